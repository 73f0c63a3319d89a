//! Shader Library
//!
//! Raw stage sources keyed by small ids, shared include chunks, and the
//! permutation generator that turns a `(program, features)` pair into final
//! GLSL text.
//!
//! Stage code is a minijinja template using the same delimiters across the
//! crate:
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `{$ include "lighting" $}` | splice a registered include chunk |
//! | `$$ if NORMAL` | line statement |
//! | `{{ LIGHT_TYPE }}` | value of an active feature |
//!
//! Generation order for each stage:
//!
//! ```text
//! #define header (active features) ─► rendered template ─► preprocessors
//! ```

use std::collections::BTreeMap;
use std::fmt;

use log::trace;
use minijinja::{Environment, UndefinedBehavior, syntax::SyntaxConfig};
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::{RenderError, Result};
use crate::renderer::resource_ids::{FragmentShaderId, ResourceKind, VertexShaderId};
use crate::renderer::uniform_layout::UniformLayouts;

use super::feature_layout::{PipelineFeatureLayout, PipelineFeatures};

const VERTEX_SHADER_MARKER: &str = "[VertexShader]";
const FRAGMENT_SHADER_MARKER: &str = "[FragmentShader]";

/// Stage sources of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramDescriptor {
    pub vertex: VertexShaderId,
    pub fragment: FragmentShaderId,
}

/// Generated sources of one permutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSources {
    /// xxh3 hash over both stages.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(self.vertex.as_bytes()) ^ xxh3_64(self.fragment.as_bytes()).rotate_left(1)
    }
}

// ─── Preprocessors ────────────────────────────────────────────────────────────

/// A text pass run over every generated stage, in registration order.
pub trait ShaderPreprocessor: Send + Sync {
    fn preprocess(&self, source: &mut String, layouts: &UniformLayouts);
}

/// Expands `cbuffer(Type, name, slot)` declarations into the struct
/// definition of the registered uniform layout `Type`.
///
/// Declarations naming an unknown layout expand to nothing.
#[derive(Debug, Default)]
pub struct ConstantBufferPreprocessor;

impl ConstantBufferPreprocessor {
    const KEYWORD: &'static str = "cbuffer(";

    fn parse(arguments: &str) -> Option<(&str, &str, u8)> {
        let mut parts = arguments.split(',').map(str::trim);
        let ty = parts.next()?;
        let name = parts.next()?;
        let slot = parts.next()?.parse().ok()?;
        if parts.next().is_some() || ty.is_empty() || name.is_empty() {
            return None;
        }
        Some((ty, name, slot))
    }
}

impl ShaderPreprocessor for ConstantBufferPreprocessor {
    fn preprocess(&self, source: &mut String, layouts: &UniformLayouts) {
        let mut output = String::with_capacity(source.len());
        let mut rest = source.as_str();

        while let Some(start) = rest.find(Self::KEYWORD) {
            let arguments_start = start + Self::KEYWORD.len();
            let Some(length) = rest[arguments_start..].find(')') else {
                break;
            };
            let arguments = &rest[arguments_start..arguments_start + length];
            let mut end = arguments_start + length + 1;
            if rest[end..].starts_with(';') {
                end += 1;
            }

            output.push_str(&rest[..start]);
            match Self::parse(arguments) {
                Some((ty, name, slot)) => {
                    if let Some(layout) = layouts.find(ty) {
                        output.push_str(&layout.generate_definition(slot, name));
                    }
                }
                None => output.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }

        output.push_str(rest);
        *source = output;
    }
}

/// Prepends `#version N`.
#[derive(Debug, Clone, Copy)]
pub struct ShaderVersionPreprocessor(pub u32);

impl ShaderPreprocessor for ShaderVersionPreprocessor {
    fn preprocess(&self, source: &mut String, _layouts: &UniformLayouts) {
        source.insert_str(0, &format!("#version {}\n", self.0));
    }
}

/// Prepends a default precision statement, after the `#version` line if
/// there is one.
#[derive(Debug, Clone)]
pub struct ShaderPrecisionPreprocessor {
    pub precision: String,
    pub ty: String,
}

impl ShaderPrecisionPreprocessor {
    #[must_use]
    pub fn new(precision: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            precision: precision.into(),
            ty: ty.into(),
        }
    }
}

impl ShaderPreprocessor for ShaderPrecisionPreprocessor {
    fn preprocess(&self, source: &mut String, _layouts: &UniformLayouts) {
        let statement = format!("precision {} {};\n", self.precision, self.ty);
        let at = if source.starts_with("#version") {
            source.find('\n').map_or(source.len(), |newline| newline + 1)
        } else {
            0
        };
        source.insert_str(at, &statement);
    }
}

// ─── ShaderLibrary ────────────────────────────────────────────────────────────

pub struct ShaderLibrary {
    env: Environment<'static>,
    vertex_shaders: Vec<String>,
    fragment_shaders: Vec<String>,
    preprocessors: Vec<Box<dyn ShaderPreprocessor>>,
}

impl fmt::Debug for ShaderLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderLibrary")
            .field("vertex_shaders", &self.vertex_shaders.len())
            .field("fragment_shaders", &self.fragment_shaders.len())
            .field("preprocessors", &self.preprocessors.len())
            .finish_non_exhaustive()
    }
}

impl ShaderLibrary {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();

        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()?;

        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(UndefinedBehavior::SemiStrict);

        Ok(Self {
            env,
            vertex_shaders: Vec::new(),
            fragment_shaders: Vec::new(),
            preprocessors: Vec::new(),
        })
    }

    // ─── Sources ──────────────────────────────────────────────────────────────

    pub fn add_vertex_shader(&mut self, code: impl Into<String>) -> Result<VertexShaderId> {
        let id = Self::next_id(&self.vertex_shaders, ResourceKind::VertexShader)?;
        self.vertex_shaders.push(code.into());
        Ok(VertexShaderId::new(id))
    }

    pub fn add_fragment_shader(&mut self, code: impl Into<String>) -> Result<FragmentShaderId> {
        let id = Self::next_id(&self.fragment_shaders, ResourceKind::FragmentShader)?;
        self.fragment_shaders.push(code.into());
        Ok(FragmentShaderId::new(id))
    }

    fn next_id(sources: &[String], kind: ResourceKind) -> Result<u16> {
        u16::try_from(sources.len() + 1).map_err(|_| RenderError::IdentifierPoolExhausted { kind })
    }

    pub fn vertex_shader(&self, id: VertexShaderId) -> Result<&str> {
        self.vertex_shaders
            .get(usize::from(id.raw()).wrapping_sub(1))
            .map(String::as_str)
            .ok_or(RenderError::InvalidResource {
                kind: ResourceKind::VertexShader,
                id: id.raw(),
            })
    }

    pub fn fragment_shader(&self, id: FragmentShaderId) -> Result<&str> {
        self.fragment_shaders
            .get(usize::from(id.raw()).wrapping_sub(1))
            .map(String::as_str)
            .ok_or(RenderError::InvalidResource {
                kind: ResourceKind::FragmentShader,
                id: id.raw(),
            })
    }

    /// Registers a shared chunk that stage code pulls in with
    /// `{$ include "name" $}`.
    pub fn add_include(&mut self, name: impl Into<String>, code: impl Into<String>) -> Result<()> {
        self.env.add_template_owned(name.into(), code.into())?;
        Ok(())
    }

    pub fn add_preprocessor(&mut self, preprocessor: Box<dyn ShaderPreprocessor>) {
        self.preprocessors.push(preprocessor);
    }

    /// Splits a combined source on its `[VertexShader]` / `[FragmentShader]`
    /// markers. A missing section is empty; `None` when neither is present.
    #[must_use]
    pub fn split_shader_file(text: &str) -> Option<(String, String)> {
        let vertex_at = text.find(VERTEX_SHADER_MARKER);
        let fragment_at = text.find(FRAGMENT_SHADER_MARKER);

        let section = |begin: Option<usize>, marker: &str, other: Option<usize>| -> String {
            let Some(begin) = begin else {
                return String::new();
            };
            let start = begin + marker.len();
            let end = other.filter(|&other| other > begin).unwrap_or(text.len());
            text[start..end].to_owned()
        };

        if vertex_at.is_none() && fragment_at.is_none() {
            return None;
        }
        Some((
            section(vertex_at, VERTEX_SHADER_MARKER, fragment_at),
            section(fragment_at, FRAGMENT_SHADER_MARKER, vertex_at),
        ))
    }

    // ─── Generation ───────────────────────────────────────────────────────────

    /// Produces the final stage sources of `program` for `features`.
    pub fn generate_shader_code(
        &self,
        program: &ProgramDescriptor,
        features: PipelineFeatures,
        feature_layout: Option<&PipelineFeatureLayout>,
        layouts: &UniformLayouts,
    ) -> Result<ShaderSources> {
        let (defines, context) = match feature_layout {
            Some(layout) => (
                layout.generate_defines(features),
                layout
                    .active(features)
                    .map(|element| (element.name.clone(), (features & element.mask) >> element.offset))
                    .collect::<BTreeMap<_, _>>(),
            ),
            None => (String::new(), BTreeMap::new()),
        };

        let vertex = self.generate_stage(self.vertex_shader(program.vertex)?, &defines, &context, layouts)?;
        let fragment = self.generate_stage(self.fragment_shader(program.fragment)?, &defines, &context, layouts)?;

        trace!("Generated permutation {features:#x} of {program:?}");
        Ok(ShaderSources { vertex, fragment })
    }

    fn generate_stage(
        &self,
        code: &str,
        defines: &str,
        context: &BTreeMap<String, PipelineFeatures>,
        layouts: &UniformLayouts,
    ) -> Result<String> {
        let body = self.env.render_str(code, context)?;

        let mut source = String::with_capacity(defines.len() + body.len());
        source.push_str(defines);
        source.push_str(&body);

        for preprocessor in &self.preprocessors {
            preprocessor.preprocess(&mut source, layouts);
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource_ids::UniformLayoutId;
    use crate::renderer::uniform_layout::{UniformBufferLayout, UniformElement, UniformType};

    fn layouts() -> UniformLayouts {
        let mut layouts = UniformLayouts::new();
        layouts.insert(
            UniformLayoutId::new(1),
            UniformBufferLayout::new("Instance", vec![UniformElement::new("transform", UniformType::Matrix4, 0)]),
        );
        layouts
    }

    #[test]
    fn test_constant_buffer_expansion() {
        let mut source = String::from("cbuffer(Instance, Instance, 1);\nvoid main() {}\n");
        ConstantBufferPreprocessor.preprocess(&mut source, &layouts());
        assert_eq!(
            source,
            "struct Instance {\n\tmat4 transform;\n}; uniform Instance cb_1;\n#define Instance cb_1\n\nvoid main() {}\n"
        );
    }

    #[test]
    fn test_unknown_constant_buffer_expands_to_nothing() {
        let mut source = String::from("cbuffer(Camera, camera, 0);x");
        ConstantBufferPreprocessor.preprocess(&mut source, &layouts());
        assert_eq!(source, "x");
    }

    #[test]
    fn test_precision_after_version() {
        let mut source = String::from("void main() {}\n");
        let layouts = UniformLayouts::new();
        ShaderVersionPreprocessor(100).preprocess(&mut source, &layouts);
        ShaderPrecisionPreprocessor::new("mediump", "float").preprocess(&mut source, &layouts);
        assert_eq!(source, "#version 100\nprecision mediump float;\nvoid main() {}\n");
    }

    #[test]
    fn test_split_either_order() {
        let (vertex, fragment) =
            ShaderLibrary::split_shader_file("[FragmentShader]frag[VertexShader]vert").unwrap();
        assert_eq!((vertex.as_str(), fragment.as_str()), ("vert", "frag"));

        let (vertex, fragment) = ShaderLibrary::split_shader_file("[VertexShader]only").unwrap();
        assert_eq!((vertex.as_str(), fragment.as_str()), ("only", ""));

        assert!(ShaderLibrary::split_shader_file("void main() {}").is_none());
    }

    #[test]
    fn test_invalid_source_id() {
        let library = ShaderLibrary::new().unwrap();
        assert!(matches!(
            library.vertex_shader(VertexShaderId::new(1)),
            Err(RenderError::InvalidResource { kind: ResourceKind::VertexShader, id: 1 })
        ));
        assert!(library.vertex_shader(VertexShaderId::INVALID).is_err());
    }
}
