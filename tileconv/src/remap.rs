use serde::{Deserialize, Serialize};

use crate::error::ConversionError;
use crate::optimize::TileGroup;
use crate::tile::EncodedTile;

/// Cell-by-cell references into the final tile list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<usize>,
}

impl Grid {
    pub fn new(width: usize, height: usize, cells: Vec<usize>) -> Result<Self, ConversionError> {
        if cells.len() != width * height {
            return Err(ConversionError::Internal(format!(
                "{} cells do not fill a {}x{} grid",
                cells.len(),
                width,
                height
            )));
        }
        Ok(Grid {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major tile indices
    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    pub fn get(&self, x: usize, y: usize) -> usize {
        self.cells[y * self.width + x]
    }

    /// Number of different tile indices in use
    pub fn distinct_values(&self) -> usize {
        let mut seen = self.cells.clone();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

/// Rewrites every cell to the final index of the group that absorbed its tile
pub struct GridRemapper;

impl GridRemapper {
    /// Returns the surviving tiles in creation order and the index grid.
    ///
    /// `cell_groups` holds each cell's original group id. A cell whose group
    /// did not end up inside any survivor is an internal error.
    pub fn remap(
        groups: &[TileGroup],
        cell_groups: &[usize],
        width: usize,
        height: usize,
    ) -> Result<(Vec<EncodedTile>, Grid), ConversionError> {
        let mut final_index: Vec<Option<usize>> = vec![None; groups.len()];
        let mut tiles = Vec::new();

        for group in groups.iter().filter(|g| g.is_active()) {
            for &member in &group.members {
                let slot = final_index.get_mut(member).ok_or_else(|| {
                    ConversionError::Internal(format!(
                        "group {} lists unknown member {member}",
                        group.id
                    ))
                })?;
                *slot = Some(tiles.len());
            }
            tiles.push(group.tile);
        }

        let cells = cell_groups
            .iter()
            .map(|&id| {
                final_index.get(id).copied().flatten().ok_or_else(|| {
                    ConversionError::Internal(format!("tile group {id} has no surviving lineage"))
                })
            })
            .collect::<Result<Vec<usize>, ConversionError>>()?;

        Ok((tiles, Grid::new(width, height, cells)?))
    }
}
