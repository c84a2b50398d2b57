//! Modal editor session: crop, rotate, zoom and colour-correct one entry.
//!
//! ## State machine
//!
//! ```text
//!            open(i)                 engine ready + decoded
//!  Closed ───────────▶ Loading(i) ─────────────────────────▶ Open(i)
//!    ▲                     │ engine/decode failure             │
//!    └─────────────────────┘                                   │
//!    ▲                 apply() (commit) / cancel()             │
//!    └─────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one session exists. Opening while another session is loading or
//! open cancels it first; its uncommitted edits are dropped, and anything
//! already applied to the upload set stays.
//!
//! ## Preview vs. bake
//!
//! Slider, rotate and zoom changes only mark the preview dirty.
//! [`Editor::next_frame`] hands out at most one [`PreviewFrame`] per dirty
//! period, so the UI redraws once per display refresh however many
//! changes arrived in between. Pixels are only re-rendered at
//! [`Editor::apply`], which bakes crop, rotation and colour into new bytes.

use crate::config::PipelineConfig;
use crate::engine::{CropEngine, CropHandle, CropRegion, EngineLoader, RasterCropEngine};
use crate::error::ScanPrepError;
use crate::pipeline::enhance::{self, ColorAdjust};
use crate::pipeline::raster;
use crate::upload::UploadSet;
use tracing::{debug, info, warn};

/// Externally observable editor phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    Loading { index: usize },
    Open { index: usize },
}

/// What the UI needs to draw one preview frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewFrame {
    pub filter: ColorAdjust,
    pub crop: CropRegion,
    pub rotation_quarter_turns: u8,
    pub zoom: f64,
}

/// An open edit on one upload entry.
pub struct EditorSession<H: CropHandle> {
    target_index: usize,
    generation: u64,
    name: String,
    original_mime_type: String,
    handle: H,
    crop: CropRegion,
    rotation_quarter_turns: u8,
    zoom: f64,
    adjust: ColorAdjust,
    preview_dirty: bool,
}

impl<H: CropHandle> EditorSession<H> {
    pub fn target_index(&self) -> usize {
        self.target_index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn crop_region(&self) -> CropRegion {
        self.crop
    }

    /// Clockwise quarter turns, 0–3.
    pub fn rotation_quarter_turns(&self) -> u8 {
        self.rotation_quarter_turns
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn brightness(&self) -> f64 {
        self.adjust.brightness
    }

    pub fn contrast(&self) -> f64 {
        self.adjust.contrast
    }

    pub fn adjust(&self) -> ColorAdjust {
        self.adjust
    }

    /// Size the committed image would have.
    pub fn output_size(&self) -> (u32, u32) {
        (self.crop.width, self.crop.height)
    }

    fn sync_from_handle(&mut self) {
        self.crop = self.handle.crop_region();
        self.preview_dirty = true;
    }
}

enum Phase<H: CropHandle> {
    Closed,
    Loading(usize),
    Open(EditorSession<H>),
}

/// Owns the (single) editor session and the crop engine.
pub struct Editor<E: CropEngine = RasterCropEngine> {
    loader: EngineLoader<E>,
    config: PipelineConfig,
    phase: Phase<E::Handle>,
    redraws: u64,
}

impl Editor<RasterCropEngine> {
    /// Editor backed by the built-in raster engine.
    pub fn with_raster_engine(config: PipelineConfig) -> Self {
        Self::new(RasterCropEngine, config)
    }
}

impl<E: CropEngine> Editor<E> {
    pub fn new(engine: E, config: PipelineConfig) -> Self {
        Self {
            loader: EngineLoader::new(engine),
            config,
            phase: Phase::Closed,
            redraws: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match &self.phase {
            Phase::Closed => SessionPhase::Closed,
            Phase::Loading(index) => SessionPhase::Loading { index: *index },
            Phase::Open(s) => SessionPhase::Open {
                index: s.target_index,
            },
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open(_))
    }

    pub fn session(&self) -> Option<&EditorSession<E::Handle>> {
        match &self.phase {
            Phase::Open(s) => Some(s),
            _ => None,
        }
    }

    pub fn engine_loader(&self) -> &EngineLoader<E> {
        &self.loader
    }

    /// Open a session on entry `index`.
    ///
    /// An out-of-range index fails without touching the current session.
    /// Engine or decode failures leave the editor `Closed`.
    pub async fn open(&mut self, set: &UploadSet, index: usize) -> Result<(), ScanPrepError> {
        let entry = set.entry(index)?;
        let generation = set.generation();
        let name = entry.name().to_string();
        let bytes = entry.current_bytes().clone();
        let original_mime_type = entry.original_mime_type().to_string();

        self.cancel();
        self.phase = Phase::Loading(index);
        debug!("Loading editor for entry {} ({})", index, name);

        let engine = match self.loader.ensure_ready().await {
            Ok(engine) => engine,
            Err(e) => {
                warn!("Editor open failed for entry {}: {}", index, e);
                self.phase = Phase::Closed;
                return Err(e);
            }
        };

        let surface = match raster::decode_async(name.clone(), bytes).await {
            Ok(img) => img,
            Err(e) => {
                warn!("Editor open failed for entry {}: {}", index, e);
                self.phase = Phase::Closed;
                return Err(e);
            }
        };

        let (w, h) = (surface.width(), surface.height());
        let handle = engine.attach(surface);
        self.phase = Phase::Open(EditorSession {
            target_index: index,
            generation,
            name,
            original_mime_type,
            crop: handle.crop_region(),
            handle,
            rotation_quarter_turns: 0,
            zoom: 1.0,
            adjust: ColorAdjust::IDENTITY,
            preview_dirty: true,
        });
        info!("Editor open on entry {} ({}x{})", index, w, h);
        Ok(())
    }

    fn open_session(&mut self) -> Option<&mut EditorSession<E::Handle>> {
        match &mut self.phase {
            Phase::Open(s) => Some(s),
            _ => None,
        }
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        if !(zoom.is_finite() && zoom > 0.0) {
            warn!("Ignoring invalid zoom factor {}", zoom);
            return;
        }
        if let Some(s) = self.open_session() {
            s.zoom = zoom;
            s.handle.set_zoom(zoom);
            s.preview_dirty = true;
        }
    }

    pub fn rotate_left(&mut self) {
        if let Some(s) = self.open_session() {
            s.handle.rotate(-90);
            s.rotation_quarter_turns = (s.rotation_quarter_turns + 3) % 4;
            s.sync_from_handle();
        }
    }

    pub fn rotate_right(&mut self) {
        if let Some(s) = self.open_session() {
            s.handle.rotate(90);
            s.rotation_quarter_turns = (s.rotation_quarter_turns + 1) % 4;
            s.sync_from_handle();
        }
    }

    /// Select a crop rectangle in rotated-image coordinates.
    ///
    /// Returns false if no session is open or nothing would remain.
    pub fn set_crop(&mut self, region: CropRegion) -> bool {
        match self.open_session() {
            Some(s) => {
                let accepted = s.handle.set_crop(region);
                if accepted {
                    s.sync_from_handle();
                }
                accepted
            }
            None => false,
        }
    }

    /// Set brightness, clamped to the configured factor bounds.
    pub fn set_brightness(&mut self, b: f64) {
        if !b.is_finite() {
            warn!("Ignoring non-finite brightness {}", b);
            return;
        }
        let b = self.config.clamp_factor(b);
        if let Some(s) = self.open_session() {
            s.adjust.brightness = b;
            s.preview_dirty = true;
        }
    }

    /// Set contrast, clamped to the configured factor bounds.
    pub fn set_contrast(&mut self, c: f64) {
        if !c.is_finite() {
            warn!("Ignoring non-finite contrast {}", c);
            return;
        }
        let c = self.config.clamp_factor(c);
        if let Some(s) = self.open_session() {
            s.adjust.contrast = c;
            s.preview_dirty = true;
        }
    }

    /// Undo every uncommitted change: full crop, no rotation, zoom 1, neutral colour.
    pub fn reset(&mut self) {
        if let Some(s) = self.open_session() {
            let turns = s.rotation_quarter_turns as i32;
            if turns != 0 {
                s.handle.rotate(-90 * turns);
            }
            s.rotation_quarter_turns = 0;
            let (w, h) = s.handle.natural_size();
            s.handle.set_crop(CropRegion::full(w, h));
            s.handle.set_zoom(1.0);
            s.zoom = 1.0;
            s.adjust = ColorAdjust::IDENTITY;
            s.sync_from_handle();
        }
    }

    /// Estimate brightness/contrast from the current crop and rotation.
    ///
    /// Existing colour factors are ignored when sampling. Returns the
    /// applied factors, or `None` (no-op) when no session is open.
    pub fn auto_enhance(&mut self) -> Option<ColorAdjust> {
        let targets = self.config.enhance;
        let bounds = self.config.factor_bounds;
        let s = self.open_session()?;

        let surface = s.handle.cropped_surface().to_rgba8();
        let stats = enhance::luminance_stats(&surface);
        let adj = enhance::estimate_from_stats(&stats, &targets, bounds);
        debug!(
            "Auto-enhance entry {}: μ={:.3} σ={:.3} → {}",
            s.target_index, stats.mean, stats.std_dev, adj
        );

        s.adjust = adj;
        s.preview_dirty = true;
        Some(adj)
    }

    /// Bake the session into new bytes and commit them to `set`.
    ///
    /// Crop, colour bake and encode (in the entry's original MIME type) run
    /// together on the blocking pool. Returns the committed index, or `None`
    /// when no session was open. If encoding or the commit fails, the set is
    /// untouched and the session stays open. If the selection was replaced
    /// since [`open`](Self::open), the session is closed with
    /// [`ScanPrepError::StaleSession`] and nothing is written.
    pub async fn apply(&mut self, set: &mut UploadSet) -> Result<Option<usize>, ScanPrepError> {
        let session = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Open(s) => s,
            other => {
                self.phase = other;
                return Ok(None);
            }
        };

        let index = session.target_index;
        if set.generation() != session.generation {
            warn!(
                "Discarding edit of entry {} ({}): the selection was replaced",
                index, session.name
            );
            session.handle.destroy();
            return Err(ScanPrepError::StaleSession { index });
        }

        let quality = self.config.quality;
        let (session, rendered) = tokio::task::spawn_blocking(move || {
            let baked = enhance::bake(&session.handle.cropped_surface(), session.adjust);
            let out = raster::encode_as_mime(&session.name, &baked, &session.original_mime_type, quality)
                .map(|(bytes, mime)| (bytes, mime.to_string(), baked.width(), baked.height()));
            (session, out)
        })
        .await
        .map_err(|e| ScanPrepError::Internal(format!("Render task panicked: {}", e)))?;

        let (bytes, mime, w, h) = match rendered {
            Ok(out) => out,
            Err(e) => {
                warn!("Apply failed for entry {}: {}", index, e);
                self.phase = Phase::Open(session);
                return Err(e);
            }
        };

        if let Err(e) = set.replace_entry(index, bytes, &mime) {
            self.phase = Phase::Open(session);
            return Err(e);
        }

        info!(
            "Applied edit to entry {}: {}x{} {} ({})",
            index,
            w,
            h,
            mime,
            session.adjust
        );
        session.handle.destroy();
        Ok(Some(index))
    }

    /// Discard the session without touching the upload set.
    pub fn cancel(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Open(s) => {
                debug!("Editor session on entry {} cancelled", s.target_index);
                s.handle.destroy();
            }
            Phase::Loading(index) => {
                debug!("Abandoned editor load for entry {}", index);
            }
            Phase::Closed => {}
        }
    }

    /// Called once per display refresh; yields a frame only if something changed.
    pub fn next_frame(&mut self) -> Option<PreviewFrame> {
        let s = match &mut self.phase {
            Phase::Open(s) if s.preview_dirty => s,
            _ => return None,
        };
        s.preview_dirty = false;
        let frame = PreviewFrame {
            filter: s.adjust,
            crop: s.crop,
            rotation_quarter_turns: s.rotation_quarter_turns,
            zoom: s.zoom,
        };
        self.redraws += 1;
        Some(frame)
    }

    /// Number of preview frames handed out so far.
    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::upload::RawFile;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn png(w: u32, h: u32, v: u8) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255])));
        raster::encode("t.png", &img, OutputFormat::Png, 80).unwrap()
    }

    fn set_of(n: usize) -> UploadSet {
        let mut set = UploadSet::new();
        set.replace_all((0..n).map(|i| {
            RawFile::new(format!("p{i}.png"), "image/png", png(6, 4, 40 + i as u8))
        }));
        set
    }

    fn editor() -> Editor {
        Editor::with_raster_engine(PipelineConfig::default())
    }

    #[tokio::test]
    async fn open_resets_session_state() {
        let set = set_of(2);
        let mut ed = editor();
        ed.open(&set, 1).await.unwrap();
        assert_eq!(ed.phase(), SessionPhase::Open { index: 1 });
        let s = ed.session().unwrap();
        assert_eq!(s.crop_region(), CropRegion::full(6, 4));
        assert_eq!(s.rotation_quarter_turns(), 0);
        assert_eq!(s.zoom(), 1.0);
        assert_eq!(s.adjust(), ColorAdjust::IDENTITY);
    }

    #[tokio::test]
    async fn open_out_of_range_keeps_current_session() {
        let set = set_of(2);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        ed.set_brightness(1.2);
        let err = ed.open(&set, 5).await.unwrap_err();
        assert!(matches!(err, ScanPrepError::IndexOutOfRange { index: 5, len: 2 }));
        assert_eq!(ed.phase(), SessionPhase::Open { index: 0 });
        assert_eq!(ed.session().unwrap().brightness(), 1.2);
    }

    #[tokio::test]
    async fn opening_another_entry_discards_uncommitted_edits() {
        let mut set = set_of(2);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        ed.set_contrast(0.7);
        ed.rotate_right();
        ed.open(&set, 1).await.unwrap();
        assert_eq!(ed.session().unwrap().contrast(), 1.0);
        assert_eq!(ed.session().unwrap().rotation_quarter_turns(), 0);
        // nothing was committed for entry 0
        ed.cancel();
        assert!(!set.get(0).unwrap().is_modified());
        assert_eq!(ed.apply(&mut set).await.unwrap(), None);
    }

    #[tokio::test]
    async fn open_on_corrupt_bytes_closes() {
        let mut set = UploadSet::new();
        set.replace_all([RawFile::new("bad.png", "image/png", b"not png".to_vec())]);
        let mut ed = editor();
        let err = ed.open(&set, 0).await.unwrap_err();
        assert!(matches!(err, ScanPrepError::DecodeFailure { .. }));
        assert_eq!(ed.phase(), SessionPhase::Closed);
    }

    #[tokio::test]
    async fn sliders_clamp_and_ignore_nan() {
        let set = set_of(1);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        ed.set_brightness(9.0);
        ed.set_contrast(0.1);
        assert_eq!(ed.session().unwrap().brightness(), 1.5);
        assert_eq!(ed.session().unwrap().contrast(), 0.5);
        ed.set_brightness(f64::NAN);
        assert_eq!(ed.session().unwrap().brightness(), 1.5);
        ed.set_zoom(-2.0);
        assert_eq!(ed.session().unwrap().zoom(), 1.0);
        ed.set_zoom(2.5);
        assert_eq!(ed.session().unwrap().zoom(), 2.5);
    }

    #[tokio::test]
    async fn rotation_wraps_modulo_four() {
        let set = set_of(1);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        ed.rotate_left();
        assert_eq!(ed.session().unwrap().rotation_quarter_turns(), 3);
        assert_eq!(ed.session().unwrap().crop_region(), CropRegion::full(4, 6));
        for _ in 0..5 {
            ed.rotate_right();
        }
        assert_eq!(ed.session().unwrap().rotation_quarter_turns(), 0);
    }

    #[tokio::test]
    async fn preview_is_coalesced_per_frame() {
        let set = set_of(1);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        assert!(ed.next_frame().is_some());
        assert!(ed.next_frame().is_none());

        for i in 0..50 {
            ed.set_brightness(0.5 + i as f64 / 50.0);
            ed.set_contrast(1.1);
        }
        let frame = ed.next_frame().expect("one frame after changes");
        assert_eq!(frame.filter.contrast, 1.1);
        assert!(ed.next_frame().is_none());
        assert_eq!(ed.redraw_count(), 2);
    }

    #[tokio::test]
    async fn auto_enhance_is_noop_when_closed() {
        let mut ed = editor();
        assert_eq!(ed.auto_enhance(), None);
        assert!(ed.next_frame().is_none());
    }

    #[tokio::test]
    async fn auto_enhance_on_flat_image_hits_upper_bound() {
        let set = set_of(1);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        ed.set_brightness(0.6);
        let adj = ed.auto_enhance().unwrap();
        // flat grey 40: σ = 0 → contrast pinned, μ ≈ 0.157 → brightness pinned
        assert_eq!(adj, ColorAdjust { brightness: 1.5, contrast: 1.5 });
        assert_eq!(ed.session().unwrap().adjust(), adj);
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let set = set_of(1);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        ed.rotate_right();
        assert!(ed.set_crop(CropRegion::new(1, 1, 2, 2)));
        ed.set_zoom(3.0);
        ed.set_contrast(1.4);
        ed.reset();
        let s = ed.session().unwrap();
        assert_eq!(s.rotation_quarter_turns(), 0);
        assert_eq!(s.crop_region(), CropRegion::full(6, 4));
        assert_eq!(s.zoom(), 1.0);
        assert_eq!(s.adjust(), ColorAdjust::IDENTITY);
    }

    #[tokio::test]
    async fn apply_commits_cropped_bytes_and_closes() {
        let mut set = set_of(2);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        assert!(ed.set_crop(CropRegion::new(1, 1, 3, 2)));
        assert_eq!(ed.apply(&mut set).await.unwrap(), Some(0));
        assert_eq!(ed.phase(), SessionPhase::Closed);

        let entry = set.get(0).unwrap();
        assert_eq!(entry.current_mime_type(), "image/png");
        assert_eq!(raster::dimensions("p0.png", entry.current_bytes()).unwrap(), (3, 2));
        assert!(!set.get(1).unwrap().is_modified());
    }

    #[tokio::test]
    async fn identity_apply_keeps_pixels() {
        let mut set = UploadSet::new();
        let img = RgbaImage::from_fn(5, 3, |x, y| Rgba([(x * 40) as u8, (y * 60) as u8, 90, 255]));
        let bytes = raster::encode("g.png", &DynamicImage::ImageRgba8(img), OutputFormat::Png, 80).unwrap();
        set.replace_all([RawFile::new("g.png", "image/png", bytes.clone())]);

        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        assert_eq!(ed.apply(&mut set).await.unwrap(), Some(0));

        let before = raster::decode("g.png", &bytes).unwrap().to_rgba8();
        let after = raster::decode("g.png", set.get(0).unwrap().current_bytes()).unwrap().to_rgba8();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn apply_after_reselection_writes_nothing() {
        let mut set = UploadSet::new();
        set.replace_all([RawFile::new("old.png", "image/png", png(12, 4, 30))]);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        ed.set_brightness(1.3);

        set.replace_all([RawFile::new("new.png", "image/png", png(8, 8, 200))]);
        let err = ed.apply(&mut set).await.unwrap_err();
        assert!(matches!(err, ScanPrepError::StaleSession { index: 0 }));
        assert_eq!(ed.phase(), SessionPhase::Closed);

        let entry = set.get(0).unwrap();
        assert!(!entry.is_modified());
        assert_eq!(raster::dimensions("new.png", entry.current_bytes()).unwrap(), (8, 8));
    }

    #[tokio::test]
    async fn cancel_leaves_set_untouched() {
        let set = set_of(1);
        let mut ed = editor();
        ed.open(&set, 0).await.unwrap();
        ed.rotate_right();
        ed.cancel();
        assert_eq!(ed.phase(), SessionPhase::Closed);
        assert!(!set.get(0).unwrap().is_modified());
    }
}
