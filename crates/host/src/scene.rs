//! Main-thread state touched by the producers

use std::sync::Arc;

use parking_lot::Mutex;

use mainthread_core::{Color, ColorTarget};

/// Stand-in for a scene graph only the main thread mutates
#[derive(Debug, Default)]
pub struct Scene {
    nodes: Vec<String>,
}

impl Scene {
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn add_node(&mut self, name: impl Into<String>) {
        self.nodes.push(name.into());
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn last_node(&self) -> Option<&str> {
        self.nodes.last().map(String::as_str)
    }
}

/// A colored UI element
#[derive(Debug)]
pub struct Swatch {
    pub name: &'static str,
    pub color: Color,
}

impl Swatch {
    pub fn shared(name: &'static str, alpha: f32) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            name,
            color: Color::BLACK.with_alpha(alpha),
        }))
    }
}

impl ColorTarget for Swatch {
    fn color(&self) -> Color {
        self.color
    }

    fn set_color(&mut self, color: Color) {
        tracing::debug!("Repainting {} to {:?}", self.name, color);
        self.color = color;
    }
}
