//! State merging and frame recording benchmarks.
//!
//! Run with `cargo bench --bench state_merge_bench`.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use pipewright::renderer::context::{HeadlessDriver, RenderingContext};
use pipewright::renderer::state::merge_blocks;
use pipewright::renderer::types::{BlendFactor, Compare, PrimitiveType, TriangleFace};
use pipewright::{RenderFrame, RenderSettings, StateBlock, TextureId, VertexBufferId};

fn scene_blocks(depth: usize) -> Vec<StateBlock> {
    (0..depth)
        .map(|level| {
            let mut block = StateBlock::new();
            let _ = block.bind_vertex_buffer(VertexBufferId::new(level as u16 + 1));
            let _ = block.bind_texture(TextureId::new(level as u16 + 1), (level % 8) as u8);
            if level % 2 == 0 {
                let _ = block.set_blend(BlendFactor::SrcAlpha, BlendFactor::InvSrcAlpha);
                let _ = block.set_depth_state(Compare::LessEqual, true);
            } else {
                let _ = block.set_cull_face(TriangleFace::Back);
            }
            block.enable_features(1 << level);
            block
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_blocks");
    for depth in [1, 4, 10] {
        let blocks = scene_blocks(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &blocks, |b, blocks| {
            b.iter(|| merge_blocks(black_box(blocks.iter().rev()), 64));
        });
    }
    group.finish();
}

fn bench_record_and_display(c: &mut Criterion) {
    let settings = RenderSettings::default();
    let mut frame = RenderFrame::new(&settings).expect("frame");
    let mut context =
        RenderingContext::new(HeadlessDriver::new(1280, 720), settings).expect("context");
    let program = context
        .request_program(
            "void main() { gl_Position = vec4(0.0); }\n",
            "void main() { gl_FragColor = vec4(1.0); }\n",
        )
        .expect("program");
    context.set_default_program(program);

    c.bench_function("record_and_display_1000_draws", |b| {
        b.iter(|| {
            for chunk in 0..10u16 {
                frame
                    .with_scope(
                        |block| {
                            block.set_depth_state(Compare::Less, chunk % 2 == 0)?;
                            block.set_cull_face(TriangleFace::Back)
                        },
                        |frame| {
                            for draw in 0..100 {
                                frame.root().draw_primitives(draw, PrimitiveType::Triangles, 0, 3)?;
                            }
                            Ok(())
                        },
                    )
                    .expect("record");
            }
            context.display(&mut frame, false).expect("display");
            context.driver_mut().reset_statistics();
        });
    });
}

criterion_group!(benches, bench_merge, bench_record_and_display);
criterion_main!(benches);
