/// Settings fixed for the lifetime of a render pipeline.
///
/// `width` and `height` are baked into the splat shader as constants, so
/// changing them means building a new pipeline.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub scale_modifier: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            scale_modifier: 1.0,
            znear: 0.01,
            zfar: 100.0,
        }
    }
}

impl RenderConfig {
    pub fn with_size(self, width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            ..self
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_size_never_produces_empty_target() {
        let config = RenderConfig::default().with_size(0, 0);
        assert_eq!(config.width, 1);
        assert_eq!(config.height, 1);
        assert_eq!(config.scale_modifier, 1.0);
    }
}
