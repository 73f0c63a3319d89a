//! Shader Library Tests
//!
//! Tests for:
//! - Permutation generation with feature defines and template conditionals
//! - Include chunks
//! - Preprocessor chain (constant buffers, version, precision)
//! - Combined shader files

use pipewright::renderer::pipeline::{
    ConstantBufferPreprocessor, PipelineFeature, PipelineFeatureLayout, ProgramDescriptor,
    ShaderLibrary, ShaderPrecisionPreprocessor, ShaderVersionPreprocessor,
};
use pipewright::renderer::uniform_layout::{
    UniformBufferLayout, UniformElement, UniformLayouts, UniformType,
};
use pipewright::{RenderError, UniformLayoutId};

fn program(library: &mut ShaderLibrary, vertex: &str, fragment: &str) -> ProgramDescriptor {
    ProgramDescriptor {
        vertex: library.add_vertex_shader(vertex).unwrap(),
        fragment: library.add_fragment_shader(fragment).unwrap(),
    }
}

fn fog_layout() -> PipelineFeatureLayout {
    PipelineFeatureLayout::from_features(&[
        ("FOG", PipelineFeature::user(0b001)),
        ("LIGHTS", PipelineFeature::user(0b110)),
    ])
}

// ============================================================================
// Generation
// ============================================================================

#[test]
fn plain_source_passes_through_unchanged() {
    let mut library = ShaderLibrary::new().unwrap();
    let descriptor = program(&mut library, "void main() {}\n", "void main() { discard; }\n");

    let sources = library
        .generate_shader_code(&descriptor, 0, None, &UniformLayouts::new())
        .unwrap();

    assert_eq!(sources.vertex, "void main() {}\n");
    assert_eq!(sources.fragment, "void main() { discard; }\n");
}

#[test]
fn active_features_become_defines() {
    let mut library = ShaderLibrary::new().unwrap();
    let descriptor = program(&mut library, "void main() {}\n", "void main() {}\n");
    let features = PipelineFeature::user(0b101);

    let sources = library
        .generate_shader_code(&descriptor, features, Some(&fog_layout()), &UniformLayouts::new())
        .unwrap();

    assert!(sources.vertex.starts_with("#define FOG 1\n#define LIGHTS 2\n"));
    assert!(sources.fragment.starts_with("#define FOG 1\n#define LIGHTS 2\n"));
}

#[test]
fn conditionals_follow_the_feature_set() {
    let mut library = ShaderLibrary::new().unwrap();
    let fragment = "$$ if FOG\nvec4 applyFog(vec4 c) { return c; }\n$$ endif\nvoid main() {}\n";
    let descriptor = program(&mut library, "void main() {}\n", fragment);
    let layouts = UniformLayouts::new();
    let layout = fog_layout();

    let with_fog = library
        .generate_shader_code(&descriptor, PipelineFeature::user(0b001), Some(&layout), &layouts)
        .unwrap();
    let without_fog = library
        .generate_shader_code(&descriptor, PipelineFeature::user(0b010), Some(&layout), &layouts)
        .unwrap();

    assert!(with_fog.fragment.contains("applyFog"));
    assert!(!without_fog.fragment.contains("applyFog"));
    assert!(!without_fog.fragment.contains("$$"));
    assert_ne!(with_fog.fingerprint(), without_fog.fingerprint());
}

#[test]
fn feature_values_can_be_interpolated() {
    let mut library = ShaderLibrary::new().unwrap();
    let descriptor = program(
        &mut library,
        "void main() {}\n",
        "const int lightCount = {{ LIGHTS }};\n",
    );

    let sources = library
        .generate_shader_code(
            &descriptor,
            PipelineFeature::user(0b110),
            Some(&fog_layout()),
            &UniformLayouts::new(),
        )
        .unwrap();

    assert!(sources.fragment.contains("const int lightCount = 3;"));
}

#[test]
fn features_outside_the_layout_are_ignored() {
    let mut library = ShaderLibrary::new().unwrap();
    let descriptor = program(&mut library, "void main() {}\n", "void main() {}\n");

    let sources = library
        .generate_shader_code(
            &descriptor,
            PipelineFeature::user(0b1000) | PipelineFeature::sampler(1),
            Some(&fog_layout()),
            &UniformLayouts::new(),
        )
        .unwrap();

    assert!(!sources.vertex.contains("#define"));
}

#[test]
fn preprocessor_directives_survive_rendering() {
    let mut library = ShaderLibrary::new().unwrap();
    let descriptor = program(
        &mut library,
        "#ifdef FOG\n#error fog in vertex stage\n#endif\n",
        "void main() {}\n",
    );

    let sources = library
        .generate_shader_code(&descriptor, 0, None, &UniformLayouts::new())
        .unwrap();

    assert!(sources.vertex.contains("#error fog in vertex stage"));
}

#[test]
fn unknown_stage_source_is_an_error() {
    let mut library = ShaderLibrary::new().unwrap();
    let mut descriptor = program(&mut library, "void main() {}\n", "void main() {}\n");
    descriptor.vertex = pipewright::renderer::resource_ids::VertexShaderId::new(9);

    let result = library.generate_shader_code(&descriptor, 0, None, &UniformLayouts::new());
    assert!(matches!(result, Err(RenderError::InvalidResource { id: 9, .. })));
}

// ============================================================================
// Includes
// ============================================================================

#[test]
fn includes_are_spliced_in() {
    let mut library = ShaderLibrary::new().unwrap();
    library
        .add_include("common", "float saturate(float v) { return clamp(v, 0.0, 1.0); }\n")
        .unwrap();
    let descriptor = program(
        &mut library,
        "{$ include \"common\" $}\nvoid main() {}\n",
        "void main() {}\n",
    );

    let sources = library
        .generate_shader_code(&descriptor, 0, None, &UniformLayouts::new())
        .unwrap();

    assert!(sources.vertex.contains("float saturate(float v)"));
    assert!(sources.vertex.contains("void main() {}"));
    assert!(!sources.vertex.contains("include"));
}

#[test]
fn includes_see_the_active_features() {
    let mut library = ShaderLibrary::new().unwrap();
    library
        .add_include("fog", "$$ if FOG\nuniform float fogDensity;\n$$ endif\n")
        .unwrap();
    let descriptor = program(
        &mut library,
        "void main() {}\n",
        "{$ include \"fog\" $}\nvoid main() {}\n",
    );
    let layout = fog_layout();
    let layouts = UniformLayouts::new();

    let on = library
        .generate_shader_code(&descriptor, PipelineFeature::user(1), Some(&layout), &layouts)
        .unwrap();
    let off = library
        .generate_shader_code(&descriptor, 0, Some(&layout), &layouts)
        .unwrap();

    assert!(on.fragment.contains("uniform float fogDensity;"));
    assert!(!off.fragment.contains("fogDensity"));
}

#[test]
fn missing_include_fails_generation() {
    let mut library = ShaderLibrary::new().unwrap();
    let descriptor = program(
        &mut library,
        "{$ include \"missing\" $}\nvoid main() {}\n",
        "void main() {}\n",
    );

    let result = library.generate_shader_code(&descriptor, 0, None, &UniformLayouts::new());
    assert!(matches!(result, Err(RenderError::Template(_))));
}

// ============================================================================
// Preprocessors
// ============================================================================

#[test]
fn constant_buffers_expand_to_registered_layouts() {
    let mut library = ShaderLibrary::new().unwrap();
    library.add_preprocessor(Box::new(ConstantBufferPreprocessor));
    let descriptor = program(
        &mut library,
        "void main() {}\n",
        "cbuffer(Material, material, 2);\nvoid main() { gl_FragColor = material.color; }\n",
    );

    let mut layouts = UniformLayouts::new();
    layouts.insert(
        UniformLayoutId::new(1),
        UniformBufferLayout::new(
            "Material",
            vec![
                UniformElement::new("color", UniformType::Vec4, 0),
                UniformElement::new("roughness", UniformType::Float, 16),
            ],
        ),
    );

    let sources = library.generate_shader_code(&descriptor, 0, None, &layouts).unwrap();

    assert!(sources.fragment.starts_with("struct Material {\n\tvec4 color;\n\tfloat roughness;\n}"));
    assert!(sources.fragment.contains("uniform Material cb_2;"));
    assert!(sources.fragment.contains("#define material cb_2"));
    assert!(!sources.fragment.contains("cbuffer("));
}

#[test]
fn preprocessors_run_in_registration_order() {
    let mut library = ShaderLibrary::new().unwrap();
    library.add_preprocessor(Box::new(ShaderVersionPreprocessor(300)));
    library.add_preprocessor(Box::new(ShaderPrecisionPreprocessor::new("mediump", "float")));
    let descriptor = program(&mut library, "void main() {}\n", "void main() {}\n");

    let sources = library
        .generate_shader_code(&descriptor, PipelineFeature::user(1), Some(&fog_layout()), &UniformLayouts::new())
        .unwrap();

    assert_eq!(
        sources.vertex,
        "#version 300\nprecision mediump float;\n#define FOG 1\nvoid main() {}\n"
    );
}

// ============================================================================
// Shader Files
// ============================================================================

#[test]
fn shader_file_sections_are_split_on_markers() {
    let text = "// shared header\n[VertexShader]\nvoid main() {}\n[FragmentShader]\nvoid main() { discard; }\n";
    let (vertex, fragment) = ShaderLibrary::split_shader_file(text).unwrap();

    assert_eq!(vertex, "\nvoid main() {}\n");
    assert_eq!(fragment, "\nvoid main() { discard; }\n");
}

#[test]
fn shader_file_without_markers_is_rejected() {
    assert!(ShaderLibrary::split_shader_file("void main() {}\n").is_none());
}
