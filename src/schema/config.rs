//! Domain decomposition and species configuration.

use serde::{Deserialize, Serialize};

/// Top-level domain configuration.
///
/// The domain is a Cartesian grid of `patches_per_dim` rectangular
/// patches, each `cells_per_patch` cells across. Particle storage is
/// partitioned into bins of `cells_per_bin` cells along the first
/// dimension. Entries beyond `ndim` are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Number of spatial dimensions (1 to 3).
    pub ndim: usize,
    /// Patches along each dimension.
    pub patches_per_dim: [usize; 3],
    /// Cells along each dimension of one patch.
    pub cells_per_patch: [usize; 3],
    /// Cell size along each dimension.
    pub cell_length: [f64; 3],
    /// Periodic physical boundary per dimension.
    pub periodic: [bool; 3],
    /// Cells clustered into one particle bin along the first dimension.
    pub cells_per_bin: usize,
    /// Particle species sharing the patch grid.
    pub species: Vec<SpeciesConfig>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            ndim: 2,
            patches_per_dim: [4, 4, 1],
            cells_per_patch: [32, 32, 1],
            cell_length: [1.0; 3],
            periodic: [false; 3],
            cells_per_bin: 8,
            species: vec![SpeciesConfig::default()],
        }
    }
}

/// One particle species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,
    pub charge: f64,
    pub mass: f64,
}

impl Default for SpeciesConfig {
    fn default() -> Self {
        Self {
            name: "electron".to_string(),
            charge: -1.0,
            mass: 1.0,
        }
    }
}

impl DomainConfig {
    /// Extent of one patch along `dim`.
    #[inline]
    pub fn patch_length(&self, dim: usize) -> f64 {
        self.cells_per_patch[dim] as f64 * self.cell_length[dim]
    }

    /// Extent of the whole domain along `dim`.
    #[inline]
    pub fn domain_length(&self, dim: usize) -> f64 {
        self.patches_per_dim[dim] as f64 * self.patch_length(dim)
    }

    /// Particle bins per patch.
    #[inline]
    pub fn bins_per_patch(&self) -> usize {
        self.cells_per_patch[0] / self.cells_per_bin
    }

    /// Width of one particle bin.
    #[inline]
    pub fn bin_width(&self) -> f64 {
        self.cells_per_bin as f64 * self.cell_length[0]
    }

    /// Total number of patches in the domain.
    pub fn total_patches(&self) -> usize {
        (0..self.ndim).map(|d| self.patches_per_dim[d]).product()
    }

    /// Cartesian coordinates of a patch from its global index (first
    /// dimension fastest).
    pub fn patch_coords(&self, index: usize) -> [usize; 3] {
        let mut coords = [0usize; 3];
        let mut rest = index;
        for d in 0..self.ndim {
            coords[d] = rest % self.patches_per_dim[d];
            rest /= self.patches_per_dim[d];
        }
        coords
    }

    /// Global index of a patch from its Cartesian coordinates.
    pub fn patch_index(&self, coords: &[usize; 3]) -> usize {
        let mut index = 0;
        for d in (0..self.ndim).rev() {
            index = index * self.patches_per_dim[d] + coords[d];
        }
        index
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ndim == 0 || self.ndim > 3 {
            return Err(ConfigError::InvalidDimensionCount { ndim: self.ndim });
        }
        for d in 0..self.ndim {
            if self.patches_per_dim[d] == 0 || self.cells_per_patch[d] == 0 {
                return Err(ConfigError::EmptyPatchGrid);
            }
            if self.cell_length[d] <= 0.0 {
                return Err(ConfigError::InvalidCellLength);
            }
        }
        if self.cells_per_bin == 0 || self.cells_per_patch[0] % self.cells_per_bin != 0 {
            return Err(ConfigError::InvalidBinClustering {
                cells: self.cells_per_patch[0],
                cells_per_bin: self.cells_per_bin,
            });
        }
        if self.species.is_empty() {
            return Err(ConfigError::NoSpecies);
        }
        Ok(())
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("dimension count must be 1 to 3, got {ndim}")]
    InvalidDimensionCount { ndim: usize },
    #[error("patch grid and patch cells must be non-zero in every dimension")]
    EmptyPatchGrid,
    #[error("cell length must be positive")]
    InvalidCellLength,
    #[error("cells_per_bin {cells_per_bin} must be non-zero and divide cells_per_patch[0] = {cells}")]
    InvalidBinClustering { cells: usize, cells_per_bin: usize },
    #[error("at least one species is required")]
    NoSpecies,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DomainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_patch_indexing_roundtrip() {
        let config = DomainConfig {
            ndim: 3,
            patches_per_dim: [3, 4, 2],
            ..DomainConfig::default()
        };
        for index in 0..config.total_patches() {
            let coords = config.patch_coords(index);
            assert_eq!(config.patch_index(&coords), index);
        }
        assert_eq!(config.patch_coords(0), [0, 0, 0]);
        assert_eq!(config.patch_coords(1), [1, 0, 0]);
        assert_eq!(config.patch_coords(3), [0, 1, 0]);
    }

    #[test]
    fn test_bin_clustering_must_divide() {
        let config = DomainConfig {
            cells_per_bin: 7,
            ..DomainConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBinClustering { cells: 32, cells_per_bin: 7 })
        ));
    }

    #[test]
    fn test_geometry_helpers() {
        let config = DomainConfig {
            ndim: 2,
            patches_per_dim: [4, 2, 1],
            cells_per_patch: [32, 16, 1],
            cell_length: [0.5, 0.25, 1.0],
            cells_per_bin: 8,
            ..DomainConfig::default()
        };
        assert_eq!(config.patch_length(0), 16.0);
        assert_eq!(config.domain_length(0), 64.0);
        assert_eq!(config.bins_per_patch(), 4);
        assert_eq!(config.bin_width(), 4.0);
        assert_eq!(config.total_patches(), 8);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = DomainConfig::default();
        let json = config.to_json().unwrap();
        let back = DomainConfig::from_json(&json).unwrap();
        assert_eq!(back.ndim, config.ndim);
        assert_eq!(back.species.len(), config.species.len());
        assert_eq!(back.species[0].name, "electron");
    }
}
