use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// Why a shader source was refused before compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShaderRejection {
    #[error("shader source is empty")]
    Empty,
    #[error("shader source is {length} characters, limit is {limit}")]
    TooLong { length: usize, limit: usize },
    #[error("unbounded loop `{0}`")]
    UnboundedLoop(&'static str),
    #[error("multiple render target write `{0}`")]
    MultipleRenderTargets(&'static str),
    #[error("unsupported LOD sampling `{0}` in {1} stage")]
    UnsupportedLod(&'static str, ShaderStage),
}

// Patterns are matched against the source with all whitespace stripped.
const UNBOUNDED_LOOPS: &[&str] = &["while(true)", "while(1)", "for(;;)"];
const MRT_WRITES: &[&str] = &["gl_FragData[", "GL_EXT_draw_buffers", "drawBuffers("];
const FRAGMENT_LOD: &[&str] = &[
    "texture2DLod(",
    "textureCubeLod(",
    "texture2DLodEXT(",
    "textureCubeLodEXT(",
    "GL_EXT_shader_texture_lod",
];

/// Static pre-compilation check. Never panics; every refusal is a value.
pub fn inspect_shader(
    source: &str,
    stage: ShaderStage,
    max_length: usize,
) -> Result<(), ShaderRejection> {
    if source.trim().is_empty() {
        return Err(ShaderRejection::Empty);
    }
    let length = source.chars().count();
    if length > max_length {
        return Err(ShaderRejection::TooLong {
            length,
            limit: max_length,
        });
    }

    let compact: String = strip_comments(source)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if let Some(pattern) = first_match(&compact, UNBOUNDED_LOOPS) {
        return Err(ShaderRejection::UnboundedLoop(pattern));
    }
    if has_conditionless_for(&compact) {
        return Err(ShaderRejection::UnboundedLoop("for(;;)"));
    }
    if let Some(pattern) = first_match(&compact, MRT_WRITES) {
        return Err(ShaderRejection::MultipleRenderTargets(pattern));
    }
    if stage == ShaderStage::Fragment {
        if let Some(pattern) = first_match(&compact, FRAGMENT_LOD) {
            return Err(ShaderRejection::UnsupportedLod(pattern, stage));
        }
    }
    Ok(())
}

fn first_match(haystack: &str, patterns: &[&'static str]) -> Option<&'static str> {
    patterns
        .iter()
        .copied()
        .find(|pattern| haystack.contains(pattern))
}

/// A `for` header whose condition clause is empty, e.g. `for(int i=0;;i++)`.
fn has_conditionless_for(compact: &str) -> bool {
    compact.match_indices("for(").any(|(at, _)| {
        let keyword = !matches!(
            compact[..at].chars().next_back(),
            Some(c) if c.is_alphanumeric() || c == '_'
        );
        let header = &compact[at + 4..];
        keyword
            && header
                .find(';')
                .is_some_and(|semi| header[semi + 1..].starts_with(';'))
    })
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    loop {
        let line = rest.find("//");
        let block = rest.find("/*");
        match (line, block) {
            (Some(l), Some(b)) if b < l => {
                out.push_str(&rest[..b]);
                rest = match rest[b + 2..].find("*/") {
                    Some(end) => &rest[b + 2 + end + 2..],
                    None => "",
                };
            }
            (Some(l), _) => {
                out.push_str(&rest[..l]);
                rest = match rest[l..].find('\n') {
                    Some(end) => &rest[l + end..],
                    None => "",
                };
            }
            (None, Some(b)) => {
                out.push_str(&rest[..b]);
                rest = match rest[b + 2..].find("*/") {
                    Some(end) => &rest[b + 2 + end + 2..],
                    None => "",
                };
            }
            (None, None) => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 50_000;

    const PLAIN_FRAGMENT: &str = r#"
        precision mediump float;
        uniform float uTime;
        varying vec3 vColor;
        void main() {
            for (int i = 0; i < 4; i++) { }
            gl_FragColor = vec4(vColor * (0.5 + 0.5 * sin(uTime)), 1.0);
        }
    "#;

    #[test]
    fn accepts_ordinary_shader() {
        assert_eq!(inspect_shader(PLAIN_FRAGMENT, ShaderStage::Fragment, LIMIT), Ok(()));
    }

    #[test]
    fn rejects_empty_and_oversized_sources() {
        assert_eq!(
            inspect_shader("   ", ShaderStage::Vertex, LIMIT),
            Err(ShaderRejection::Empty)
        );
        let long = "x".repeat(LIMIT + 1);
        assert!(matches!(
            inspect_shader(&long, ShaderStage::Vertex, LIMIT),
            Err(ShaderRejection::TooLong { .. })
        ));
    }

    #[test]
    fn rejects_unbounded_loops_regardless_of_spacing() {
        let src = "void main() { while ( true ) { } }";
        assert_eq!(
            inspect_shader(src, ShaderStage::Vertex, LIMIT),
            Err(ShaderRejection::UnboundedLoop("while(true)"))
        );
        let src = "void main() { for ( ; ; ) { } }";
        assert!(inspect_shader(src, ShaderStage::Fragment, LIMIT).is_err());
    }

    #[test]
    fn rejects_for_loops_without_a_condition() {
        let src = "void main() { for (int i = 0; ; i++) { } }";
        assert_eq!(
            inspect_shader(src, ShaderStage::Fragment, LIMIT),
            Err(ShaderRejection::UnboundedLoop("for(;;)"))
        );
        let src = "vec3 transform(vec3 p) { return p; } void main() { for (int i = 0; i < 8; i++) { } }";
        assert!(inspect_shader(src, ShaderStage::Vertex, LIMIT).is_ok());
    }

    #[test]
    fn length_limit_counts_characters() {
        let src = format!("void main() {{ }} // {}", "\u{00e9}".repeat(20));
        let chars = src.chars().count();
        assert!(src.len() > chars);
        assert!(inspect_shader(&src, ShaderStage::Vertex, chars).is_ok());
        assert!(matches!(
            inspect_shader(&src, ShaderStage::Vertex, chars - 1),
            Err(ShaderRejection::TooLong { length, .. }) if length == chars
        ));
    }

    #[test]
    fn rejects_mrt_writes() {
        let src = "void main() { gl_FragData[1] = vec4(1.0); }";
        assert!(matches!(
            inspect_shader(src, ShaderStage::Fragment, LIMIT),
            Err(ShaderRejection::MultipleRenderTargets(_))
        ));
    }

    #[test]
    fn lod_sampling_only_rejected_in_fragment_stage() {
        let src = "uniform sampler2D t; void main() { vec4 c = texture2DLod(t, vec2(0.0), 2.0); }";
        assert!(inspect_shader(src, ShaderStage::Vertex, LIMIT).is_ok());
        assert!(matches!(
            inspect_shader(src, ShaderStage::Fragment, LIMIT),
            Err(ShaderRejection::UnsupportedLod(_, ShaderStage::Fragment))
        ));
    }

    #[test]
    fn commented_out_patterns_are_ignored() {
        let src = "// while(true) {}\n/* gl_FragData[0] */ void main() { }";
        assert!(inspect_shader(src, ShaderStage::Fragment, LIMIT).is_ok());
    }
}
