//! Shared color palette with change notifications
//!
//! A [`Palette`] is a broadcast color source: writers call
//! [`Palette::set_color`] from any thread and every subscriber receives the
//! changed index. Visual elements stay in sync through a [`ColorBinding`],
//! which repaints them on the main thread via the dispatcher.
//!
//! # Example
//!
//! ```ignore
//! use mainthread_core::palette::{Color, ColorBinding, Opacity, Palette};
//!
//! let palette = Palette::new(vec![Color::WHITE; 4]);
//! let binding = ColorBinding::bind(&palette, &handle, 2, Opacity::Keep, label.clone());
//!
//! // From any thread; the label repaints on the next drain
//! palette.set_color(2, Color::rgb(1.0, 0.2, 0.2));
//! ```

mod binding;

use std::sync::Arc;

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

pub use binding::{ColorBinding, ColorTarget, Opacity};

new_key_type! {
    /// Key for palette subscribers, used for removal
    pub struct PaletteListenerKey;
}

/// An RGBA color with components in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Same color with a different alpha
    pub const fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

type ColorListener = Arc<dyn Fn(usize) + Send + Sync>;

struct PaletteInner {
    colors: RwLock<Vec<Color>>,
    listeners: RwLock<SlotMap<PaletteListenerKey, ColorListener>>,
}

/// Indexed colors shared between threads
#[derive(Clone)]
pub struct Palette {
    inner: Arc<PaletteInner>,
}

impl Palette {
    pub fn new(colors: Vec<Color>) -> Self {
        Self {
            inner: Arc::new(PaletteInner {
                colors: RwLock::new(colors),
                listeners: RwLock::new(SlotMap::with_key()),
            }),
        }
    }

    /// Number of colors
    pub fn len(&self) -> usize {
        self.inner.colors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.colors.read().is_empty()
    }

    /// Get the color at `index`
    pub fn color(&self, index: usize) -> Option<Color> {
        self.inner.colors.read().get(index).copied()
    }

    /// Replace the color at `index` and notify subscribers
    ///
    /// Subscribers run on the calling thread, after the palette lock is
    /// released.
    ///
    /// # Returns
    /// `false` if `index` is out of range (nothing is notified)
    pub fn set_color(&self, index: usize, color: Color) -> bool {
        {
            let mut colors = self.inner.colors.write();
            match colors.get_mut(index) {
                Some(slot) => *slot = color,
                None => return false,
            }
        }

        self.notify(index);
        true
    }

    /// Register a callback receiving the index of every changed color
    ///
    /// # Returns
    /// A key that can be used to unsubscribe via `unsubscribe`
    pub fn subscribe<F>(&self, listener: F) -> PaletteListenerKey
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.inner.listeners.write().insert(Arc::new(listener))
    }

    /// Remove a subscriber
    ///
    /// Returns `true` if the subscriber was found and removed.
    pub fn unsubscribe(&self, key: PaletteListenerKey) -> bool {
        self.inner.listeners.write().remove(key).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    fn notify(&self, index: usize) {
        let listeners: Vec<ColorListener> = self.inner.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(index);
        }
    }
}

impl std::fmt::Debug for Palette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Palette")
            .field("colors", &*self.inner.colors.read())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_get_and_set_color() {
        let palette = Palette::new(vec![Color::WHITE, Color::BLACK]);
        assert_eq!(palette.len(), 2);
        assert_eq!(palette.color(1), Some(Color::BLACK));
        assert_eq!(palette.color(2), None);

        assert!(palette.set_color(0, Color::rgb(0.5, 0.0, 0.0)));
        assert_eq!(palette.color(0), Some(Color::rgb(0.5, 0.0, 0.0)));
        assert!(!palette.set_color(5, Color::WHITE));
    }

    #[test]
    fn test_subscribers_notified() {
        let palette = Palette::new(vec![Color::WHITE; 3]);
        let changed = Arc::new(Mutex::new(Vec::new()));

        let c = changed.clone();
        let key = palette.subscribe(move |index| c.lock().push(index));

        palette.set_color(2, Color::BLACK);
        palette.set_color(0, Color::BLACK);
        palette.set_color(9, Color::BLACK);
        assert_eq!(*changed.lock(), vec![2, 0]);

        assert!(palette.unsubscribe(key));
        assert!(!palette.unsubscribe(key));
        palette.set_color(1, Color::BLACK);
        assert_eq!(*changed.lock(), vec![2, 0]);
    }

    #[test]
    fn test_subscriber_can_read_palette() {
        let palette = Palette::new(vec![Color::WHITE]);
        let seen = Arc::new(Mutex::new(None));

        let reader = palette.clone();
        let s = seen.clone();
        palette.subscribe(move |index| *s.lock() = reader.color(index));

        palette.set_color(0, Color::TRANSPARENT);
        assert_eq!(*seen.lock(), Some(Color::TRANSPARENT));
    }

    #[test]
    fn test_with_alpha() {
        assert_eq!(Color::WHITE.with_alpha(0.25), Color::new(1.0, 1.0, 1.0, 0.25));
    }
}
