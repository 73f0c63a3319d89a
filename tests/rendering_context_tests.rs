//! Rendering Context Tests
//!
//! Tests for:
//! - Deferred resource construction and adopted upload data
//! - Transient texture remapping across nested render-to-texture passes
//! - Permutation compilation, caching and precompilation
//! - Uniform upload from constant buffers and revision caching
//! - Render targets, viewports and framebuffer reuse
//! - Failure paths: broken shaders, missing programs, stale ids
//! - Releasing every driver object on teardown

use glam::Vec4;

use pipewright::renderer::commands::CommandBuffer;
use pipewright::renderer::context::{Driver, HeadlessDriver, RenderingContext};
use pipewright::renderer::pipeline::PipelineFeature;
use pipewright::renderer::types::{
    BlendFactor, ClearMask, NormalizedViewport, PixelFormat, PrimitiveType, TriangleFace, Viewport,
};
use pipewright::renderer::uniform_layout::{UniformElement, UniformType, UniformValue};
use pipewright::renderer::vertex_format::VertexFormat;
use pipewright::{ProgramId, RenderError, RenderFrame, RenderSettings, TextureId};

const VERTEX: &str = "void main() { gl_Position = vec4(0.0); }\n";
const FRAGMENT: &str = "void main() { gl_FragColor = vec4(1.0); }\n";

fn setup() -> (RenderingContext<HeadlessDriver>, RenderFrame) {
    let _ = env_logger::builder().is_test(true).try_init();
    let settings = RenderSettings::default();
    let frame = RenderFrame::new(&settings).unwrap();
    let context = RenderingContext::new(HeadlessDriver::new(256, 256), settings).unwrap();
    (context, frame)
}

fn with_default_program(context: &mut RenderingContext<HeadlessDriver>) -> ProgramId {
    let program = context.request_program(VERTEX, FRAGMENT).unwrap();
    context.set_default_program(program);
    program
}

fn draw(frame: &mut RenderFrame) -> pipewright::Result<()> {
    frame.root().draw_primitives(0, PrimitiveType::Triangles, 0, 3)
}

// ============================================================================
// Resource Construction
// ============================================================================

#[test]
fn requested_buffers_exist_after_display() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();

    let mut vertices = vec![1u8, 2, 3, 4, 5, 6];
    let id = context.request_vertex_buffer(&vertices)?;
    vertices.iter_mut().for_each(|byte| *byte = 0);

    assert!(id.is_valid());
    assert_eq!(context.pending_resource_count(), 1);
    assert!(context.vertex_buffer_handle(id).is_err());

    context.display(&mut frame, false)?;

    let handle = context.vertex_buffer_handle(id)?;
    assert_eq!(context.driver().buffer_data(handle), Some(&[1u8, 2, 3, 4, 5, 6][..]));
    assert_eq!(context.pending_resource_count(), 0);
    Ok(())
}

#[test]
fn vertex_upload_copies_data_at_call_time() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let id = context.request_vertex_buffer(&[0; 8])?;
    context.display(&mut frame, false)?;

    let mut data = vec![9u8, 8, 7, 6];
    frame.root().upload_vertex_buffer(id, &data)?;
    data.clear();
    drop(data);

    context.display(&mut frame, false)?;
    let handle = context.vertex_buffer_handle(id)?;
    assert_eq!(context.driver().buffer_data(handle), Some(&[9u8, 8, 7, 6, 0, 0, 0, 0][..]));
    Ok(())
}

#[test]
fn constant_buffer_upload_round_trip() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let layout = context.request_uniform_layout(
        "Material",
        vec![UniformElement::new("color", UniformType::Vec4, 0)],
    )?;
    let buffer = context.request_constant_buffer(&[], layout)?;
    context.display(&mut frame, false)?;
    assert_eq!(context.constant_buffer_data(buffer)?, &[0u8; 16][..]);

    let mut color = [0.25f32, 0.5, 0.75, 1.0];
    frame.root().upload_constant_buffer_typed(buffer, &color)?;
    color = [0.0; 4];

    context.display(&mut frame, false)?;
    let stored: Vec<f32> = bytemuck::pod_collect_to_vec(context.constant_buffer_data(buffer)?);
    assert_eq!(stored, [0.25, 0.5, 0.75, 1.0]);
    assert_eq!(color, [0.0; 4]);
    Ok(())
}

#[test]
fn oversized_constant_buffer_upload_fails() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let layout = context.request_uniform_layout(
        "Scalar",
        vec![UniformElement::new("value", UniformType::Float, 0)],
    )?;
    let buffer = context.request_constant_buffer(&[], layout)?;
    context.display(&mut frame, false)?;

    frame.root().upload_constant_buffer(buffer, &[0; 32])?;
    let result = context.display(&mut frame, false);
    assert!(matches!(
        result,
        Err(RenderError::ConstantBufferTooSmall { capacity: 4, size: 32, .. })
    ));
    Ok(())
}

#[test]
fn texture_request_stores_pixels() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let pixels = vec![255u8; 2 * 2 * 4];
    let texture = context.request_texture_2d(2, 2, PixelFormat::Rgba8, &pixels)?;
    context.display(&mut frame, false)?;

    let handle = context.texture_handle(texture)?;
    assert_eq!(context.driver().texture_data(handle), Some(pixels.as_slice()));
    assert_eq!(context.driver().texture_desc(handle).map(|desc| desc.width), Some(2));
    Ok(())
}

#[test]
fn input_layouts_are_cached_per_format() -> anyhow::Result<()> {
    let (mut context, _) = setup();
    let a = context.request_input_layout(VertexFormat::NORMAL)?;
    let b = context.request_input_layout(VertexFormat::POSITION | VertexFormat::NORMAL)?;
    let c = context.request_input_layout(VertexFormat::UV0)?;
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(context.pending_resource_count(), 2);
    Ok(())
}

#[test]
fn deleting_unknown_resources_fails_immediately() {
    let (mut context, _) = setup();
    assert!(matches!(
        context.delete_texture(TextureId::new(7)),
        Err(RenderError::InvalidResource { id: 7, .. })
    ));
    assert!(context.delete_program(ProgramId::new(1)).is_err());
}

#[test]
fn deleted_texture_id_is_recycled() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let texture = context.request_texture_2d(4, 4, PixelFormat::Rgba8, &[])?;
    context.display(&mut frame, false)?;

    context.delete_texture(texture)?;
    context.display(&mut frame, false)?;
    assert!(context.texture_handle(texture).is_err());
    assert_eq!(context.driver().calls().textures_deleted, 1);

    let recycled = context.request_texture_2d(8, 8, PixelFormat::Rgba8, &[])?;
    assert_eq!(recycled, texture);
    Ok(())
}

#[test]
fn shader_file_without_markers_is_invalid() -> anyhow::Result<()> {
    let (mut context, _) = setup();
    assert_eq!(context.request_shader_file("void main() {}")?, ProgramId::INVALID);

    let program = context.request_shader_file(&format!("[VertexShader]{VERTEX}[FragmentShader]{FRAGMENT}"))?;
    assert!(program.is_valid());
    Ok(())
}

// ============================================================================
// Frame Lifecycle
// ============================================================================

#[test]
fn frame_is_reset_to_baseline_after_display() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);

    frame.with_scope(
        |block| block.set_cull_face(TriangleFace::Front),
        |frame| {
            let nested = frame.create_command_buffer()?;
            frame.record(nested)?.draw_primitives(0, PrimitiveType::Triangles, 0, 3)?;
            frame.root().execute(nested)
        },
    )?;
    context.display(&mut frame, false)?;

    assert_eq!(frame.allocated_bytes(), std::mem::size_of::<CommandBuffer>());
    assert_eq!(frame.command_buffer_count(), 1);
    assert!(frame.state_stack().is_empty());

    frame.root().clear(Vec4::ZERO, ClearMask::ALL)?;
    context.display(&mut frame, false)?;

    let calls = context.driver().calls();
    assert_eq!(calls.draws, 1);
    assert_eq!(calls.clears, 1);
    assert_eq!(calls.presents, 2);
    assert_eq!(context.counters().frames_displayed, 2);
    Ok(())
}

#[test]
fn merged_states_reach_the_driver() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);
    let vertices = context.request_vertex_buffer(&[0; 36])?;

    frame.with_scope(
        |block| {
            block.bind_vertex_buffer(vertices)?;
            block.set_blend(BlendFactor::SrcAlpha, BlendFactor::InvSrcAlpha)?;
            block.set_cull_face(TriangleFace::Front)
        },
        |frame| {
            frame.with_scope(
                |block| block.set_cull_face(TriangleFace::Back),
                |frame| draw(frame),
            )
        },
    )?;
    context.display(&mut frame, false)?;

    let recorded = &context.driver().draws()[0];
    assert_eq!(recorded.vertex_buffer, Some(context.vertex_buffer_handle(vertices)?));
    assert_eq!(recorded.raster.blending, (BlendFactor::SrcAlpha, BlendFactor::InvSrcAlpha));
    assert_eq!(recorded.raster.cull_face, TriangleFace::Back);
    Ok(())
}

#[test]
fn redundant_states_are_not_reissued() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);

    frame.with_scope(
        |block| block.set_cull_face(TriangleFace::Front),
        |frame| {
            draw(frame)?;
            draw(frame)
        },
    )?;
    context.display(&mut frame, false)?;

    let first_draw_changes = context.counters().state_changes;
    assert!(first_draw_changes > 0);
    assert_eq!(context.counters().draw_calls, 2);

    context.reset_frame_counters();
    frame.with_scope(
        |block| block.set_cull_face(TriangleFace::Front),
        |frame| draw(frame),
    )?;
    context.display(&mut frame, false)?;

    // The pipeline is reset after every frame, so the first draw reissues everything.
    assert_eq!(context.counters().state_changes, first_draw_changes);
    Ok(())
}

// ============================================================================
// Transient Textures
// ============================================================================

#[test]
fn nested_transient_slots_do_not_alias() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);

    let outer = frame.root().acquire_texture_2d(64, 64, PixelFormat::Rgba8)?;
    let pass = frame.root().render_to_texture(outer, NormalizedViewport::FULL)?;

    let inner = frame.record(pass)?.acquire_texture_2d(32, 32, PixelFormat::Rgba8)?;
    assert_eq!(inner.raw(), outer.raw());

    frame.with_scope(
        |block| block.bind_transient_texture(inner, 0),
        |frame| frame.record(pass)?.draw_primitives(0, PrimitiveType::Triangles, 0, 3),
    )?;
    frame.record(pass)?.release_texture(inner)?;
    frame.root().release_texture(outer)?;

    context.display(&mut frame, false)?;

    let recorded = &context.driver().draws()[0];
    let framebuffer = recorded.framebuffer.expect("draw inside a render-to-texture pass");
    let (target, side) = context
        .driver()
        .framebuffer(framebuffer)
        .and_then(|fb| fb.color)
        .expect("colour attachment");
    let sampled = recorded.textures[0].expect("bound transient texture");

    assert_ne!(target, sampled);
    assert_eq!(side, None);
    assert_eq!(context.transient_texture_count(), 2);
    assert_eq!(context.counters().textures_allocated, 2);
    Ok(())
}

#[test]
fn released_transient_textures_are_reused() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();

    for _ in 0..3 {
        let texture = frame.root().acquire_texture_2d(16, 16, PixelFormat::Rgba8)?;
        frame.root().release_texture(texture)?;
        context.display(&mut frame, false)?;
    }

    assert_eq!(context.transient_texture_count(), 1);
    assert_eq!(context.driver().calls().textures_created, 1);
    Ok(())
}

#[test]
fn leaked_transient_textures_return_to_the_pool() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();

    frame.root().acquire_texture_2d(16, 16, PixelFormat::Rgba8)?;
    context.display(&mut frame, false)?;
    frame.root().acquire_texture_2d(16, 16, PixelFormat::Rgba8)?;
    context.display(&mut frame, false)?;

    assert_eq!(context.transient_texture_count(), 1);
    Ok(())
}

#[test]
fn trimming_deletes_idle_transient_textures() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let texture = frame.root().acquire_texture_2d(16, 16, PixelFormat::Rgba8)?;
    frame.root().release_texture(texture)?;
    context.display(&mut frame, false)?;

    context.trim_transient_textures(1)?;
    assert_eq!(context.transient_texture_count(), 1);
    context.trim_transient_textures(1)?;
    assert_eq!(context.transient_texture_count(), 0);
    assert_eq!(context.driver().texture_count(), 0);
    Ok(())
}

#[test]
fn buffers_can_cycle_more_transients_than_a_few_slots() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);

    for _ in 0..12 {
        let texture = frame.root().acquire_texture_2d(16, 16, PixelFormat::Rgba8)?;
        frame.with_scope(
            |block| block.bind_transient_texture(texture, 0),
            |frame| draw(frame),
        )?;
        frame.root().release_texture(texture)?;
    }
    context.display(&mut frame, false)?;

    assert_eq!(context.driver().calls().draws, 12);
    assert_eq!(context.transient_texture_count(), 1);
    Ok(())
}

#[test]
fn deleting_a_pooled_texture_removes_it_from_the_pool() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let texture = frame.root().acquire_texture_2d(16, 16, PixelFormat::Rgba8)?;
    frame.root().release_texture(texture)?;
    context.display(&mut frame, false)?;

    // The pool hands out global ids from the persistent texture pool.
    let pooled = TextureId::new(1);
    assert!(context.texture_handle(pooled).is_ok());
    context.delete_texture(pooled)?;
    context.display(&mut frame, false)?;
    assert_eq!(context.transient_texture_count(), 0);

    let texture = frame.root().acquire_texture_2d(16, 16, PixelFormat::Rgba8)?;
    frame.root().release_texture(texture)?;
    context.display(&mut frame, false)?;

    assert_eq!(context.driver().calls().textures_created, 2);
    assert_eq!(context.driver().texture_count(), 1);
    assert_eq!(context.transient_texture_count(), 1);
    Ok(())
}

// ============================================================================
// Render Targets
// ============================================================================

#[test]
fn render_to_persistent_texture_uses_its_size() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);
    let texture = context.request_texture_2d(128, 64, PixelFormat::Rgba8, &[])?;

    for _ in 0..2 {
        let pass = frame
            .root()
            .render_to_persistent_texture(texture, NormalizedViewport::new(0.0, 0.0, 0.5, 1.0))?;
        frame.record(pass)?.draw_primitives(0, PrimitiveType::Triangles, 0, 3)?;
        context.display(&mut frame, false)?;
    }

    let draws = context.driver().draws();
    assert_eq!(draws[0].viewport, Viewport::new(0, 0, 64, 64));
    assert!(draws[0].framebuffer.is_some());
    assert_eq!(draws[0].framebuffer, draws[1].framebuffer);

    assert_eq!(context.framebuffer_count(), 1);
    assert_eq!(context.counters().framebuffers_allocated, 1);
    assert_eq!(context.driver().viewport(), Viewport::new(0, 0, 256, 256));
    assert_eq!(context.driver().bound_framebuffer(), None);
    Ok(())
}

#[test]
fn render_to_target_scales_against_the_surface() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);

    let half = frame.root().render_to_target(NormalizedViewport::new(0.5, 0.0, 0.5, 1.0))?;
    frame.record(half)?.draw_primitives(0, PrimitiveType::Triangles, 0, 3)?;
    context.display(&mut frame, false)?;

    assert_eq!(context.driver().draws()[0].viewport, Viewport::new(128, 0, 128, 256));
    assert_eq!(context.driver().viewport(), Viewport::new(0, 0, 256, 256));
    Ok(())
}

// ============================================================================
// Permutations
// ============================================================================

#[test]
fn identical_features_compile_once() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);
    let layout = context.request_pipeline_feature_layout(&[
        ("FOG", PipelineFeature::user(0b01)),
        ("LIGHTING", PipelineFeature::user(0b10)),
    ])?;

    frame.with_scope(
        |block| {
            block.bind_feature_layout(layout)?;
            block.enable_features(0b01);
            Ok(())
        },
        |frame| {
            draw(frame)?;
            draw(frame)?;
            frame.with_scope(
                |block| {
                    block.enable_features(0b10);
                    Ok(())
                },
                |frame| draw(frame),
            )?;
            draw(frame)
        },
    )?;
    context.display(&mut frame, false)?;

    let counters = context.counters();
    assert_eq!(counters.permutations_compiled, 2);
    assert_eq!(counters.permutation_cache_hits, 1);
    assert_eq!(counters.draw_calls, 4);
    assert_eq!(context.permutation_count(), 2);
    assert_eq!(context.driver().calls().programs_linked, 2);
    Ok(())
}

#[test]
fn textures_bound_by_earlier_draws_do_not_select_features() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);
    let layout = context.request_pipeline_feature_layout(&[("T0", PipelineFeature::sampler(0))])?;
    let texture = context.request_texture_2d(4, 4, PixelFormat::Rgba8, &[])?;

    let textured = |frame: &mut RenderFrame| {
        frame.with_scope(
            |block| {
                block.bind_feature_layout(layout)?;
                block.bind_texture(texture, 0)
            },
            |frame| draw(frame),
        )
    };
    let untextured = |frame: &mut RenderFrame| {
        frame.with_scope(|block| block.bind_feature_layout(layout), |frame| draw(frame))
    };

    textured(&mut frame)?;
    untextured(&mut frame)?;
    context.display(&mut frame, false)?;

    assert_eq!(context.counters().permutations_compiled, 2);
    assert_eq!(context.counters().permutation_cache_hits, 0);
    let draws = context.driver().draws();
    assert_ne!(draws[0].program, draws[1].program);

    // Reversed order resolves to the same permutations.
    untextured(&mut frame)?;
    textured(&mut frame)?;
    context.display(&mut frame, false)?;

    assert_eq!(context.counters().permutations_compiled, 2);
    assert_eq!(context.counters().permutation_cache_hits, 2);
    let draws = context.driver().draws();
    assert_eq!(draws[2].program, draws[1].program);
    assert_eq!(draws[3].program, draws[0].program);
    Ok(())
}

#[test]
fn shadowed_block_features_select_the_permutation() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);
    let layout = context.request_pipeline_feature_layout(&[("FOG", PipelineFeature::user(1))])?;

    // The inner block sets the same categories, so only its states are
    // merged, but the outer block's feature still applies.
    frame.with_scope(
        |outer| {
            outer.enable_features(1);
            outer.bind_feature_layout(layout)
        },
        |frame| {
            frame.with_scope(|inner| inner.bind_feature_layout(layout), |frame| draw(frame))
        },
    )?;
    frame.with_scope(
        |block| {
            block.enable_features(1);
            block.bind_feature_layout(layout)
        },
        |frame| draw(frame),
    )?;
    context.display(&mut frame, false)?;

    assert_eq!(context.counters().permutations_compiled, 1);
    assert_eq!(context.counters().permutation_cache_hits, 1);
    Ok(())
}

#[test]
fn permutations_survive_frames() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);

    for _ in 0..3 {
        draw(&mut frame)?;
        context.display(&mut frame, false)?;
    }

    assert_eq!(context.counters().permutations_compiled, 1);
    assert_eq!(context.counters().permutation_cache_hits, 2);

    context.reset_frame_counters();
    assert_eq!(context.counters().permutation_cache_hits, 0);
    assert_eq!(context.permutation_cache_statistics(), (2, 1));
    Ok(())
}

#[test]
fn precompiled_permutation_is_used_by_draws() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let program = with_default_program(&mut context);
    let layout = context.request_pipeline_feature_layout(&[("FOG", PipelineFeature::user(1))])?;

    context.precompile_permutation(program, PipelineFeature::user(1) | PipelineFeature::sampler(3), layout);
    context.display(&mut frame, false)?;
    assert_eq!(context.permutation_count(), 1);
    assert_eq!(context.counters().permutations_compiled, 1);

    frame.with_scope(
        |block| {
            block.bind_feature_layout(layout)?;
            block.enable_features(1);
            Ok(())
        },
        |frame| draw(frame),
    )?;
    context.display(&mut frame, false)?;

    assert_eq!(context.counters().permutations_compiled, 1);
    assert_eq!(context.counters().permutation_cache_hits, 1);
    Ok(())
}

#[test]
fn permutation_cache_capacity_evicts_programs() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let settings = RenderSettings::default().with_permutation_cache_capacity(Some(1));
    let mut frame = RenderFrame::new(&settings)?;
    let mut context = RenderingContext::new(HeadlessDriver::default(), settings)?;
    with_default_program(&mut context);
    let layout = context.request_pipeline_feature_layout(&[("FOG", PipelineFeature::user(1))])?;

    draw(&mut frame)?;
    frame.with_scope(
        |block| {
            block.bind_feature_layout(layout)?;
            block.enable_features(1);
            Ok(())
        },
        |frame| draw(frame),
    )?;
    context.display(&mut frame, false)?;

    assert_eq!(context.permutation_count(), 1);
    assert_eq!(context.driver().calls().programs_deleted, 1);
    assert_eq!(context.driver().program_count(), 1);
    Ok(())
}

#[test]
fn deleting_a_program_drops_its_permutations() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let program = with_default_program(&mut context);
    draw(&mut frame)?;
    context.display(&mut frame, false)?;
    assert_eq!(context.permutation_count(), 1);

    context.delete_program(program)?;
    context.display(&mut frame, false)?;

    assert_eq!(context.permutation_count(), 0);
    assert_eq!(context.driver().program_count(), 0);
    assert_eq!(context.default_program(), ProgramId::INVALID);
    Ok(())
}

#[test]
fn broken_shader_is_recompiled_on_every_request() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let program = context.request_program(VERTEX, "void main() {\n#error unfinished\n}\n")?;

    for attempt in 1..=2 {
        frame.with_scope(|block| block.bind_program(program), |frame| draw(frame))?;
        let result = context.display(&mut frame, false);
        assert!(matches!(result, Err(RenderError::NoValidPermutation { .. })));

        assert_eq!(context.driver().calls().shaders_compiled, 2 * attempt);
        assert_eq!(context.driver().shader_count(), 0);
        assert_eq!(frame.allocated_bytes(), std::mem::size_of::<CommandBuffer>());
    }

    assert_eq!(context.permutation_count(), 0);
    assert_eq!(context.driver().calls().presents, 0);
    Ok(())
}

#[test]
fn draw_without_program_fails() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    draw(&mut frame)?;
    assert!(matches!(context.display(&mut frame, false), Err(RenderError::NoProgram)));
    assert_eq!(context.driver().calls().draws, 0);
    Ok(())
}

// ============================================================================
// Uniforms
// ============================================================================

#[test]
fn uniforms_are_uploaded_from_bound_constant_buffers() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    let layout = context.request_uniform_layout(
        "Material",
        vec![UniformElement::new("color", UniformType::Vec4, 0)],
    )?;
    let program = context.request_program(
        VERTEX,
        "cbuffer(Material, material, 0);\nvoid main() { gl_FragColor = material.color; }\n",
    )?;
    context.set_default_program(program);
    let buffer = context.request_constant_buffer(bytemuck::cast_slice(&[1.0f32, 0.0, 0.0, 1.0]), layout)?;

    let record = |frame: &mut RenderFrame| {
        frame.with_scope(|block| block.bind_constant_buffer(buffer, 0), |frame| draw(frame))
    };

    record(&mut frame)?;
    context.display(&mut frame, false)?;
    let handle = context.driver().draws()[0].program.expect("bound program");
    assert_eq!(
        context.driver().uniform(handle, "cb_0.color"),
        Some(&UniformValue::Vec4(vec![Vec4::new(1.0, 0.0, 0.0, 1.0)]))
    );
    assert_eq!(context.counters().uniforms_uploaded, 1);

    // Unchanged buffer: nothing to upload.
    context.reset_frame_counters();
    record(&mut frame)?;
    context.display(&mut frame, false)?;
    assert_eq!(context.counters().uniforms_uploaded, 0);

    context.reset_frame_counters();
    frame.root().upload_constant_buffer_typed(buffer, &[0.0f32, 1.0, 0.0, 1.0])?;
    record(&mut frame)?;
    context.display(&mut frame, false)?;
    assert_eq!(context.counters().uniforms_uploaded, 1);
    assert_eq!(
        context.driver().uniform(handle, "cb_0.color"),
        Some(&UniformValue::Vec4(vec![Vec4::new(0.0, 1.0, 0.0, 1.0)]))
    );
    Ok(())
}

#[test]
fn uniform_caching_can_be_disabled() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let settings = RenderSettings::default().with_uniform_caching(false);
    let mut frame = RenderFrame::new(&settings)?;
    let mut context = RenderingContext::new(HeadlessDriver::default(), settings)?;

    let layout = context.request_uniform_layout(
        "Scalar",
        vec![UniformElement::new("value", UniformType::Float, 0)],
    )?;
    let program = context.request_program(VERTEX, "cbuffer(Scalar, scalar, 2);\nvoid main() {}\n")?;
    context.set_default_program(program);
    let buffer = context.request_constant_buffer(&2.0f32.to_ne_bytes(), layout)?;

    frame.with_scope(
        |block| block.bind_constant_buffer(buffer, 2),
        |frame| {
            draw(frame)?;
            draw(frame)
        },
    )?;
    context.display(&mut frame, false)?;

    assert_eq!(context.counters().uniforms_uploaded, 2);
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn settings_load_from_partial_json() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let settings: RenderSettings = serde_json::from_str(
        r#"{ "glsl_version": 100, "float_precision": "mediump", "permutation_cache_capacity": null }"#,
    )?;

    assert_eq!(settings.glsl_version, 100);
    assert_eq!(settings.float_precision.as_deref(), Some("mediump"));
    assert_eq!(settings.permutation_cache_capacity, None);
    assert_eq!(settings.frame_arena_capacity, RenderSettings::default().frame_arena_capacity);

    let mut frame = RenderFrame::new(&settings)?;
    let mut context = RenderingContext::new(HeadlessDriver::default(), settings)?;
    with_default_program(&mut context);
    draw(&mut frame)?;
    context.display(&mut frame, true)?;

    assert_eq!(context.driver().calls().draws, 1);
    Ok(())
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn releasing_resources_empties_the_driver() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);
    let layout = context.request_uniform_layout(
        "Scalar",
        vec![UniformElement::new("value", UniformType::Float, 0)],
    )?;
    let vertices = context.request_vertex_buffer(&[0; 36])?;
    let indices = context.request_index_buffer(&[0; 6])?;
    let constants = context.request_constant_buffer(&1.0f32.to_ne_bytes(), layout)?;
    let texture = context.request_texture_2d(32, 32, PixelFormat::Rgba8, &[])?;

    let transient = frame.root().acquire_texture_2d(16, 16, PixelFormat::Rgba8)?;
    frame.with_scope(
        |block| {
            block.bind_vertex_buffer(vertices)?;
            block.bind_index_buffer(indices)?;
            block.bind_constant_buffer(constants, 0)?;
            block.bind_transient_texture(transient, 0)
        },
        |frame| frame.root().draw_indexed(0, PrimitiveType::Triangles, 0, 6),
    )?;
    frame.root().release_texture(transient)?;
    let pass = frame.root().render_to_persistent_texture(texture, NormalizedViewport::FULL)?;
    frame.record(pass)?.draw_primitives(0, PrimitiveType::Triangles, 0, 3)?;
    context.display(&mut frame, false)?;

    assert_eq!(context.driver().buffer_count(), 2);
    assert_eq!(context.driver().texture_count(), 2);
    assert_eq!(context.driver().framebuffer_count(), 1);
    assert_eq!(context.driver().program_count(), 1);

    context.release_resources()?;

    let driver = context.driver();
    assert_eq!(driver.buffer_count(), 0);
    assert_eq!(driver.texture_count(), 0);
    assert_eq!(driver.framebuffer_count(), 0);
    assert_eq!(driver.program_count(), 0);
    assert_eq!(driver.calls().buffers_deleted, 2);
    assert_eq!(context.transient_texture_count(), 0);
    assert_eq!(context.permutation_count(), 0);
    assert!(context.vertex_buffer_handle(vertices).is_err());
    assert!(context.constant_buffer_data(constants).is_err());
    Ok(())
}

#[test]
fn pending_requests_are_released_too() -> anyhow::Result<()> {
    let (mut context, _) = setup();
    context.request_vertex_buffer(&[0; 12])?;
    context.request_texture_2d(8, 8, PixelFormat::Rgba8, &[])?;

    context.release_resources()?;

    assert_eq!(context.pending_resource_count(), 0);
    assert_eq!(context.driver().calls().buffers_created, 1);
    assert_eq!(context.driver().buffer_count(), 0);
    assert_eq!(context.driver().texture_count(), 0);
    Ok(())
}

#[test]
fn context_is_usable_after_releasing_resources() -> anyhow::Result<()> {
    let (mut context, mut frame) = setup();
    with_default_program(&mut context);
    let first = context.request_vertex_buffer(&[0; 12])?;
    draw(&mut frame)?;
    context.display(&mut frame, false)?;

    context.release_resources()?;

    let second = context.request_vertex_buffer(&[1; 12])?;
    assert_eq!(second, first);
    frame.with_scope(|block| block.bind_vertex_buffer(second), |frame| draw(frame))?;
    context.display(&mut frame, false)?;

    let handle = context.vertex_buffer_handle(second)?;
    assert_eq!(context.driver().draws()[1].vertex_buffer, Some(handle));
    assert_eq!(context.counters().permutations_compiled, 2);
    Ok(())
}
