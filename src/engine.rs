//! Crop/transform engine capability.
//!
//! The editor never touches an engine's internals. It needs a one-time
//! asynchronous [`CropEngine::init`], a way to [`attach`](CropEngine::attach)
//! a decoded surface, and the handful of [`CropHandle`] operations below.
//! [`RasterCropEngine`] is the built-in implementation on top of the
//! `image` crate; tests substitute fakes.
//!
//! Crop rectangles are expressed in the coordinates of the *rotated* image,
//! at natural resolution. Zoom is a view concern: it changes how large the
//! surface is displayed, never the pixel size of the cropped output.

use crate::error::ScanPrepError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A crop rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole of a `width × height` surface.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Intersect with a `width × height` surface. `None` if nothing is left.
    pub fn clamp_to(self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, w, h))
    }

    /// The same rectangle after the `width × height` image turns 90° clockwise.
    pub fn after_right_turn(self, _width: u32, height: u32) -> Self {
        Self::new(height - (self.y + self.height), self.x, self.height, self.width)
    }

    /// The same rectangle after the `width × height` image turns 90° counter-clockwise.
    pub fn after_left_turn(self, width: u32, _height: u32) -> Self {
        Self::new(self.y, width - (self.x + self.width), self.height, self.width)
    }
}

/// A crop/transform engine that can be attached to decoded surfaces.
pub trait CropEngine: Send + Sync {
    type Handle: CropHandle;

    /// One-time initialisation (loading assets, spinning up a worker, …).
    ///
    /// Callers go through [`EngineLoader`], which runs this at most once
    /// successfully.
    fn init(&self) -> impl Future<Output = Result<(), String>> + Send;

    /// Attach to `surface`. The crop starts as the full image, unrotated, zoom 1.
    fn attach(&self, surface: DynamicImage) -> Self::Handle;
}

/// Interactive state over one attached surface.
pub trait CropHandle: Send + 'static {
    fn set_zoom(&mut self, zoom: f64);

    /// Rotate by `degrees`, a multiple of 90 (negative = counter-clockwise).
    fn rotate(&mut self, degrees: i32);

    /// Select a crop rectangle; it is clipped to the rotated image.
    /// Returns false (and keeps the previous crop) if nothing would remain.
    fn set_crop(&mut self, region: CropRegion) -> bool;

    fn crop_region(&self) -> CropRegion;

    /// Current natural size after rotation.
    fn natural_size(&self) -> (u32, u32);

    /// Render crop + rotation at natural resolution.
    fn cropped_surface(&self) -> DynamicImage;

    /// Release the surface.
    fn destroy(self);
}

/// Memoizes a successful [`CropEngine::init`] across editor sessions.
///
/// A failed initialisation is not remembered, so the next `open` tries again.
pub struct EngineLoader<E: CropEngine> {
    engine: E,
    ready: OnceCell<()>,
}

impl<E: CropEngine> EngineLoader<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            ready: OnceCell::new(),
        }
    }

    /// Initialise the engine if that has not yet succeeded.
    pub async fn ensure_ready(&self) -> Result<&E, ScanPrepError> {
        self.ready
            .get_or_try_init(|| async {
                info!("Initialising crop engine");
                self.engine
                    .init()
                    .await
                    .map_err(ScanPrepError::EngineUnavailable)
            })
            .await?;
        Ok(&self.engine)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

/// Built-in engine backed by `image::DynamicImage` transforms.
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterCropEngine;

impl CropEngine for RasterCropEngine {
    type Handle = RasterCropHandle;

    fn init(&self) -> impl Future<Output = Result<(), String>> + Send {
        async { Ok(()) }
    }

    fn attach(&self, surface: DynamicImage) -> RasterCropHandle {
        RasterCropHandle::new(surface)
    }
}

/// Handle produced by [`RasterCropEngine`].
#[derive(Debug, Clone)]
pub struct RasterCropHandle {
    source: DynamicImage,
    quarter_turns: u8,
    zoom: f64,
    crop: CropRegion,
}

impl RasterCropHandle {
    pub fn new(source: DynamicImage) -> Self {
        let crop = CropRegion::full(source.width(), source.height());
        Self {
            source,
            quarter_turns: 0,
            zoom: 1.0,
            crop,
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Clockwise quarter turns applied, 0–3.
    pub fn quarter_turns(&self) -> u8 {
        self.quarter_turns
    }

    fn rotated(&self) -> DynamicImage {
        match self.quarter_turns {
            1 => self.source.rotate90(),
            2 => self.source.rotate180(),
            3 => self.source.rotate270(),
            _ => self.source.clone(),
        }
    }
}

impl CropHandle for RasterCropHandle {
    fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom;
    }

    fn rotate(&mut self, degrees: i32) {
        let turns = (degrees / 90).rem_euclid(4);
        for _ in 0..turns {
            let (w, h) = self.natural_size();
            self.crop = self.crop.after_right_turn(w, h);
            self.quarter_turns = (self.quarter_turns + 1) % 4;
        }
        if degrees % 90 != 0 {
            debug!("Ignoring non-quarter rotation remainder of {}°", degrees % 90);
        }
    }

    fn set_crop(&mut self, region: CropRegion) -> bool {
        let (w, h) = self.natural_size();
        match region.clamp_to(w, h) {
            Some(r) => {
                self.crop = r;
                true
            }
            None => false,
        }
    }

    fn crop_region(&self) -> CropRegion {
        self.crop
    }

    fn natural_size(&self) -> (u32, u32) {
        let (w, h) = (self.source.width(), self.source.height());
        if self.quarter_turns % 2 == 1 {
            (h, w)
        } else {
            (w, h)
        }
    }

    fn cropped_surface(&self) -> DynamicImage {
        let c = self.crop;
        let rotated = self.rotated();
        if c == CropRegion::full(rotated.width(), rotated.height()) {
            return rotated;
        }
        rotated.crop_imm(c.x, c.y, c.width, c.height)
    }

    fn destroy(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 4×2 image, each pixel's red channel = x + 10·y.
    fn coded(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x + 10 * y) as u8, 0, 0, 255])
        }))
    }

    #[test]
    fn clamp_to_trims_and_rejects() {
        assert_eq!(
            CropRegion::new(2, 1, 10, 10).clamp_to(4, 3),
            Some(CropRegion::new(2, 1, 2, 2))
        );
        assert_eq!(CropRegion::new(4, 0, 1, 1).clamp_to(4, 3), None);
        assert_eq!(CropRegion::new(0, 0, 0, 3).clamp_to(4, 3), None);
    }

    #[test]
    fn turning_right_then_left_is_identity() {
        let r = CropRegion::new(1, 0, 2, 1);
        let turned = r.after_right_turn(4, 2);
        assert_eq!(turned.after_left_turn(2, 4), r);
    }

    #[test]
    fn attach_starts_full_and_unrotated() {
        let h = RasterCropEngine.attach(coded(4, 2));
        assert_eq!(h.crop_region(), CropRegion::full(4, 2));
        assert_eq!(h.natural_size(), (4, 2));
        assert_eq!(h.quarter_turns(), 0);
        assert_eq!(h.zoom(), 1.0);
    }

    #[test]
    fn rotate_right_swaps_dimensions() {
        let mut h = RasterCropEngine.attach(coded(4, 2));
        h.rotate(90);
        assert_eq!(h.natural_size(), (2, 4));
        assert_eq!(h.crop_region(), CropRegion::full(2, 4));
        let out = h.cropped_surface();
        assert_eq!((out.width(), out.height()), (2, 4));
        // Top-left after a clockwise turn is the old bottom-left (0,1).
        assert_eq!(out.to_rgba8().get_pixel(0, 0).0[0], 10);
    }

    #[test]
    fn rotate_is_modulo_four() {
        let mut h = RasterCropEngine.attach(coded(4, 2));
        h.rotate(-90);
        assert_eq!(h.quarter_turns(), 3);
        h.rotate(90);
        assert_eq!(h.quarter_turns(), 0);
        h.rotate(450);
        assert_eq!(h.quarter_turns(), 1);
    }

    #[test]
    fn crop_follows_rotation() {
        let mut h = RasterCropEngine.attach(coded(4, 2));
        assert!(h.set_crop(CropRegion::new(3, 0, 1, 1)));
        let before = h.cropped_surface().to_rgba8().get_pixel(0, 0).0[0];
        h.rotate(90);
        h.rotate(-90);
        h.rotate(270);
        h.rotate(90);
        let after = h.cropped_surface();
        assert_eq!((after.width(), after.height()), (1, 1));
        assert_eq!(after.to_rgba8().get_pixel(0, 0).0[0], before);
    }

    #[test]
    fn crop_selects_pixels() {
        let mut h = RasterCropEngine.attach(coded(4, 2));
        assert!(h.set_crop(CropRegion::new(1, 1, 2, 1)));
        let out = h.cropped_surface().to_rgba8();
        assert_eq!(out.dimensions(), (2, 1));
        assert_eq!(out.get_pixel(0, 0).0[0], 11);
        assert_eq!(out.get_pixel(1, 0).0[0], 12);
    }

    #[test]
    fn empty_crop_is_refused() {
        let mut h = RasterCropEngine.attach(coded(4, 2));
        assert!(!h.set_crop(CropRegion::new(9, 9, 1, 1)));
        assert_eq!(h.crop_region(), CropRegion::full(4, 2));
    }

    #[test]
    fn zoom_does_not_change_output_size() {
        let mut h = RasterCropEngine.attach(coded(4, 2));
        h.set_zoom(3.0);
        let out = h.cropped_surface();
        assert_eq!((out.width(), out.height()), (4, 2));
    }

    #[derive(Debug)]
    struct CountingEngine {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl CropEngine for CountingEngine {
        type Handle = RasterCropHandle;

        fn init(&self) -> impl Future<Output = Result<(), String>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = n < self.fail_first;
            async move {
                if fail {
                    Err("asset fetch failed".to_string())
                } else {
                    Ok(())
                }
            }
        }

        fn attach(&self, surface: DynamicImage) -> RasterCropHandle {
            RasterCropHandle::new(surface)
        }
    }

    #[tokio::test]
    async fn loader_initialises_once() {
        let loader = EngineLoader::new(CountingEngine {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });
        loader.ensure_ready().await.unwrap();
        loader.ensure_ready().await.unwrap();
        assert!(loader.is_ready());
        assert_eq!(loader.engine().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_retries_after_failure() {
        let loader = EngineLoader::new(CountingEngine {
            calls: AtomicUsize::new(0),
            fail_first: 1,
        });
        let err = loader.ensure_ready().await.unwrap_err();
        assert!(matches!(err, ScanPrepError::EngineUnavailable(_)));
        assert!(!loader.is_ready());
        loader.ensure_ready().await.unwrap();
        assert_eq!(loader.engine().calls.load(Ordering::SeqCst), 2);
    }
}
