use crate::scene::ShDegree;
use crate::splat_math::{LOW_PASS, MAX_ALPHA, MIN_DISCRIMINANT, NEAR_CULL};
use std::collections::HashMap;
use std::fmt::Write;
use wgpu::{Device, ShaderModule, ShaderModuleDescriptor, ShaderSource};

const COMMON: &str = include_str!("common.wgsl");
const SPLAT: &str = include_str!("splat.wgsl");

/// Concatenate shared includes with a main shader source.
pub fn combine_sources(includes: &[&str], main_source: &str) -> String {
    let mut combined = String::new();
    for include in includes {
        combined.push_str(include);
        combined.push('\n');
    }
    combined.push_str(main_source);
    combined
}

/// Load a shader by concatenating shared includes with a main shader source.
pub fn load_shader(device: &Device, label: &str, includes: &[&str], main_source: &str) -> ShaderModule {
    device.create_shader_module(ShaderModuleDescriptor {
        label: Some(label),
        source: ShaderSource::Wgsl(combine_sources(includes, main_source).into()),
    })
}

/// Load a compute shader that only needs common.wgsl.
pub fn load_with_common(device: &Device, label: &str, main_source: &str) -> ShaderModule {
    load_shader(device, label, &[COMMON], main_source)
}

/// Values baked into the splat shader as module-scope constants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SplatShaderConfig {
    pub width: u32,
    pub height: u32,
    pub sh_degree: ShDegree,
}

/// Full WGSL of the splat shader specialized for `config`.
pub fn splat_shader_source(config: &SplatShaderConfig) -> String {
    let mut constants = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(constants, "const SCREEN_WIDTH: f32 = {:.1};", config.width as f32);
    let _ = writeln!(constants, "const SCREEN_HEIGHT: f32 = {:.1};", config.height as f32);
    let _ = writeln!(constants, "const SH_DEGREE: u32 = {}u;", config.sh_degree.get());
    let _ = writeln!(constants, "const SH_COUNT: u32 = {}u;", config.sh_degree.coeff_count());
    // Footprint constants come from `splat_math`.
    for (name, value) in [
        ("LOW_PASS", LOW_PASS),
        ("MIN_DISCRIMINANT", MIN_DISCRIMINANT),
        ("MAX_ALPHA", MAX_ALPHA),
        ("NEAR_CULL", NEAR_CULL),
    ] {
        let _ = writeln!(constants, "const {name}: f32 = {value:?};");
    }
    combine_sources(&[&constants, COMMON], SPLAT)
}

/// One compiled splat shader per distinct configuration.
#[derive(Default)]
pub struct ShaderCache {
    modules: HashMap<SplatShaderConfig, ShaderModule>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn splat_shader(&mut self, device: &Device, config: SplatShaderConfig) -> ShaderModule {
        self.modules
            .entry(config)
            .or_insert_with(|| {
                tracing::debug!(?config, "compiling splat shader");
                device.create_shader_module(ShaderModuleDescriptor {
                    label: Some("splat shader"),
                    source: ShaderSource::Wgsl(splat_shader_source(&config).into()),
                })
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::tests::test_context;

    fn config(width: u32, height: u32, degree: u8) -> SplatShaderConfig {
        SplatShaderConfig {
            width,
            height,
            sh_degree: ShDegree::new(degree).unwrap(),
        }
    }

    #[test]
    fn constants_precede_shader_body() {
        let source = splat_shader_source(&config(1280, 720, 2));
        let width = source.find("const SCREEN_WIDTH: f32 = 1280.0;").unwrap();
        let count = source.find("const SH_COUNT: u32 = 9u;").unwrap();
        let body = source.find("fn vs_main").unwrap();
        assert!(width < body && count < body);
        assert!(source.contains("const SCREEN_HEIGHT: f32 = 720.0;"));
        assert!(source.contains("const SH_DEGREE: u32 = 2u;"));
        assert!(source.contains("const NEAR_CULL: f32 = 0.2;"));
        assert!(source.contains("const LOW_PASS: f32 = 0.3;"));
        assert_eq!(source.matches("const MAX_ALPHA").count(), 1);
    }

    #[test]
    fn source_generation_is_pure() {
        let a = splat_shader_source(&config(640, 480, 3));
        let b = splat_shader_source(&config(640, 480, 3));
        assert_eq!(a, b);
        assert_ne!(a, splat_shader_source(&config(640, 480, 1)));
    }

    #[test]
    fn includes_are_concatenated_in_order() {
        let combined = combine_sources(&["// a", "// b"], "// main");
        assert_eq!(combined, "// a\n// b\n// main");
    }

    #[test]
    fn cache_compiles_each_config_once() {
        let Some(ctx) = test_context() else { return };
        let mut cache = ShaderCache::new();
        assert!(cache.is_empty());
        cache.splat_shader(&ctx.device, config(64, 64, 0));
        cache.splat_shader(&ctx.device, config(64, 64, 0));
        assert_eq!(cache.len(), 1);
        cache.splat_shader(&ctx.device, config(64, 32, 0));
        assert_eq!(cache.len(), 2);
    }
}
