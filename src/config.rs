//! Verifier configuration and test image location

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::golden::{
    CLUSTERS, ClusterExpectation, LIMITS, PixelExpectation, RAW_TILE_NUMBER, RGBA_TILE_ORIGIN,
};

/// File name of the canonical test image
pub const TEST_IMAGE_NAME: &str = "quad-tile.jpg.tiff";

/// Configuration for a verification run
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Image to open (opened twice, read-only)
    pub(crate) source: PathBuf,
    /// Tile read in raw and RGB mode
    pub(crate) raw_tile: u32,
    /// Pixel origin of the tile read as packed RGBA
    pub(crate) rgba_origin: (u32, u32),
    /// Expected raw clusters
    pub(crate) clusters: Vec<ClusterExpectation>,
    /// Expected channel ranges, shared by the RGB and RGBA checks
    pub(crate) limits: Vec<PixelExpectation>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(TEST_IMAGE_NAME),
            raw_tile: RAW_TILE_NUMBER,
            rgba_origin: RGBA_TILE_ORIGIN,
            clusters: CLUSTERS.to_vec(),
            limits: LIMITS.to_vec(),
        }
    }
}

impl VerifierConfig {
    /// Create a configuration for `source` with the canonical golden values
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Set the tile number read in raw and RGB mode
    pub fn raw_tile(mut self, tile: u32) -> Self {
        self.raw_tile = tile;
        self
    }

    /// Set the pixel origin of the tile read as packed RGBA
    ///
    /// Both coordinates must be multiples of the tile size.
    pub fn rgba_origin(mut self, x: u32, y: u32) -> Self {
        self.rgba_origin = (x, y);
        self
    }

    /// Replace the expected raw clusters
    pub fn clusters(mut self, clusters: impl Into<Vec<ClusterExpectation>>) -> Self {
        self.clusters = clusters.into();
        self
    }

    /// Replace the expected pixel channel ranges
    pub fn limits(mut self, limits: impl Into<Vec<PixelExpectation>>) -> Self {
        self.limits = limits.into();
        self
    }

    /// The image this configuration opens
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Location of the test image under a project root
pub fn image_path_in(root: &Path) -> PathBuf {
    root.join("test").join("images").join(TEST_IMAGE_NAME)
}

/// Derive the project root from a working directory inside its `build` tree.
///
/// Returns the path up to (not including) the last `build` component, or
/// `None` if there is no such component.
pub fn project_root_from(cwd: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = cwd.components().collect();
    let build = components
        .iter()
        .rposition(|c| c.as_os_str() == OsStr::new("build"))?;
    Some(components[..build].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_golden_tables() {
        let config = VerifierConfig::new("/data/quad-tile.jpg.tiff");
        assert_eq!(config.source(), Path::new("/data/quad-tile.jpg.tiff"));
        assert_eq!(config.raw_tile, 9);
        assert_eq!(config.rgba_origin, (128, 256));
        assert_eq!(config.clusters, CLUSTERS);
        assert_eq!(config.limits, LIMITS);
    }

    #[test]
    fn test_builder_overrides() {
        let config = VerifierConfig::new("x.tiff")
            .raw_tile(0)
            .rgba_origin(0, 0)
            .clusters(&CLUSTERS[..1])
            .limits(Vec::<PixelExpectation>::new());
        assert_eq!(config.raw_tile, 0);
        assert_eq!(config.rgba_origin, (0, 0));
        assert_eq!(config.clusters.len(), 1);
        assert!(config.limits.is_empty());
    }

    #[test]
    fn test_image_path_in_root() {
        assert_eq!(
            image_path_in(Path::new("/src/libtiff")),
            PathBuf::from("/src/libtiff/test/images/quad-tile.jpg.tiff")
        );
    }

    #[test]
    fn test_project_root_from_build_dir() {
        assert_eq!(
            project_root_from(Path::new("/src/libtiff/build")),
            Some(PathBuf::from("/src/libtiff"))
        );
        assert_eq!(
            project_root_from(Path::new("/src/libtiff/build/example/debug")),
            Some(PathBuf::from("/src/libtiff"))
        );
        // The last build component wins
        assert_eq!(
            project_root_from(Path::new("/build/proj/build/out")),
            Some(PathBuf::from("/build/proj"))
        );
    }

    #[test]
    fn test_project_root_requires_whole_component() {
        assert_eq!(project_root_from(Path::new("/src/rebuild/out")), None);
        assert_eq!(project_root_from(Path::new("/src/libtiff")), None);
    }
}
