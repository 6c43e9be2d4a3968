//! Keeps a visual element's color in sync with a palette entry

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Color, Palette, PaletteInner, PaletteListenerKey};
use crate::tasks::DispatchHandle;

/// Alpha handling when applying a palette color
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Opacity {
    /// Keep the element's current alpha
    #[default]
    Keep,
    /// Use this alpha, clamped to `0.0..=1.0`
    Override(f32),
}

impl Opacity {
    /// Combine a palette color with the element's current color
    pub fn apply(self, palette_color: Color, current: Color) -> Color {
        match self {
            Self::Keep => palette_color.with_alpha(current.a),
            Self::Override(alpha) => palette_color.with_alpha(alpha.clamp(0.0, 1.0)),
        }
    }
}

/// A visual element whose color can be read and painted on the main thread
pub trait ColorTarget: Send + 'static {
    fn color(&self) -> Color;
    fn set_color(&mut self, color: Color);
}

/// Subscription repainting one element from one palette index
///
/// Palette changes may be broadcast from any thread; the repaint itself is
/// always queued onto the main thread. Dropping the binding unsubscribes.
#[must_use = "dropping the binding unsubscribes it"]
pub struct ColorBinding {
    palette: Palette,
    key: PaletteListenerKey,
    index: usize,
}

impl ColorBinding {
    /// Paint `target` now and repaint it whenever `index` changes
    ///
    /// Call on the main thread, since the initial paint happens immediately.
    pub fn bind<T>(
        palette: &Palette,
        handle: &DispatchHandle,
        index: usize,
        opacity: Opacity,
        target: Arc<Mutex<T>>,
    ) -> Self
    where
        T: ColorTarget,
    {
        repaint(palette, index, opacity, &target);

        let source: Weak<PaletteInner> = Arc::downgrade(&palette.inner);
        let handle = handle.clone();
        let key = palette.subscribe(move |changed| {
            if changed != index {
                return;
            }
            let Some(inner) = source.upgrade() else {
                return;
            };

            let palette = Palette { inner };
            let target = target.clone();
            if let Err(e) = handle.enqueue_fn(move || repaint(&palette, index, opacity, &target)) {
                tracing::warn!("Dropping repaint for palette index {}: {}", index, e);
            }
        });

        Self {
            palette: palette.clone(),
            key,
            index,
        }
    }

    /// Palette index this binding follows
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for ColorBinding {
    fn drop(&mut self) {
        self.palette.unsubscribe(self.key);
    }
}

fn repaint<T: ColorTarget>(palette: &Palette, index: usize, opacity: Opacity, target: &Mutex<T>) {
    let Some(color) = palette.color(index) else {
        tracing::debug!("Palette index {} out of range, skipping repaint", index);
        return;
    };

    let mut target = target.lock();
    let current = target.color();
    target.set_color(opacity.apply(color, current));
}
