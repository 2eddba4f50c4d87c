/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::sync::Arc;

use gridla_comm::{ProcessGroup, Transport};
use tracing::debug;

use crate::error::{Error, Result};

/// How grid coordinates map to ranks of the underlying group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridOrder {
    /// Rank `k` sits at `(k / width, k % width)`.
    RowMajor,
    /// Rank `k` sits at `(k % height, k / height)`.
    ColumnMajor,
}

/// A logical 2-D arrangement of the processes of a group.
///
/// Immutable once constructed and shared by `Arc`: any number of
/// distributed matrices reference one grid for their whole lifetime. The
/// row, column, and all-rank teams are derived at construction; the
/// diagonal teams are derived on demand. Ranks beyond `height * width`
/// are non-participating: they sit in no team and own no matrix entries.
pub struct ProcessGrid {
    transport: Arc<dyn Transport>,
    height: usize,
    width: usize,
    order: GridOrder,
    coord: Option<(usize, usize)>,
    row_team: Option<ProcessGroup>,
    col_team: Option<ProcessGroup>,
    all_team: ProcessGroup,
}

impl std::fmt::Debug for ProcessGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGrid")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("order", &self.order)
            .field("coord", &self.coord)
            .field("row_team", &self.row_team)
            .field("col_team", &self.col_team)
            .field("all_team", &self.all_team)
            .finish_non_exhaustive()
    }
}

impl ProcessGrid {
    /// Arrange the whole group into `height` rows, deriving the width.
    ///
    /// `height == 0` asks for the squarest grid the group size allows.
    /// Fails before any communication if `height` does not divide the
    /// group size evenly.
    pub fn new(
        transport: Arc<dyn Transport>,
        height: usize,
        order: GridOrder,
    ) -> Result<Arc<Self>> {
        let size = transport.world_size();
        let height = if height == 0 {
            // Largest divisor of the group size not exceeding its square
            // root gives the squarest factorization.
            (1..=size)
                .take_while(|h| h * h <= size)
                .filter(|h| size % h == 0)
                .last()
                .unwrap_or(1)
        } else {
            height
        };
        if size % height != 0 {
            return Err(Error::GridShape {
                group_size: size,
                height,
            });
        }
        Self::with_shape(transport, height, size / height, order)
    }

    /// Arrange the first `height * width` ranks of the group into a grid;
    /// the remaining ranks become non-participants.
    pub fn with_shape(
        transport: Arc<dyn Transport>,
        height: usize,
        width: usize,
        order: GridOrder,
    ) -> Result<Arc<Self>> {
        let size = transport.world_size();
        if height == 0 || width == 0 || height * width > size {
            return Err(Error::GridTooLarge {
                height,
                width,
                group_size: size,
            });
        }

        let rank_of = |row: usize, col: usize| -> usize {
            match order {
                GridOrder::RowMajor => row * width + col,
                GridOrder::ColumnMajor => row + col * height,
            }
        };

        let me = transport.world_rank();
        let coord = if me < height * width {
            Some(match order {
                GridOrder::RowMajor => (me / width, me % width),
                GridOrder::ColumnMajor => (me % height, me / height),
            })
        } else {
            None
        };

        let row_team = coord.map(|(row, _)| {
            ProcessGroup::new(
                transport.clone(),
                (0..width).map(|q| rank_of(row, q)).collect(),
            )
        });
        let col_team = coord.map(|(_, col)| {
            ProcessGroup::new(
                transport.clone(),
                (0..height).map(|p| rank_of(p, col)).collect(),
            )
        });
        // All in-grid ranks, walking the grid column-major; this is the
        // team order the linear (vector) distributions use.
        let all_team = ProcessGroup::new(
            transport.clone(),
            (0..height * width)
                .map(|v| rank_of(v % height, v / height))
                .collect(),
        );

        debug!(
            height,
            width,
            rank = me,
            in_grid = coord.is_some(),
            "constructed process grid"
        );

        Ok(Arc::new(Self {
            transport,
            height,
            width,
            order,
            coord,
            row_team,
            col_team,
            all_team,
        }))
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of in-grid processes (`height * width`).
    pub fn size(&self) -> usize {
        self.height * self.width
    }

    pub fn order(&self) -> GridOrder {
        self.order
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// This process's `(row, col)`, or `None` when it is not in the grid.
    pub fn coord(&self) -> Option<(usize, usize)> {
        self.coord
    }

    pub fn in_grid(&self) -> bool {
        self.coord.is_some()
    }

    /// The grid row of a world rank, if it is in the grid.
    pub fn row_of(&self, rank: usize) -> Option<usize> {
        self.coord_of(rank).map(|(row, _)| row)
    }

    /// The grid column of a world rank, if it is in the grid.
    pub fn col_of(&self, rank: usize) -> Option<usize> {
        self.coord_of(rank).map(|(_, col)| col)
    }

    /// The coordinate of a world rank, if it is in the grid.
    pub fn coord_of(&self, rank: usize) -> Option<(usize, usize)> {
        if rank >= self.size() {
            return None;
        }
        Some(match self.order {
            GridOrder::RowMajor => (rank / self.width, rank % self.width),
            GridOrder::ColumnMajor => (rank % self.height, rank / self.height),
        })
    }

    /// The world rank at grid cell `(row, col)`.
    pub fn rank_of(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.height && col < self.width);
        match self.order {
            GridOrder::RowMajor => row * self.width + col,
            GridOrder::ColumnMajor => row + col * self.height,
        }
    }

    /// This process's row team (its grid row, ordered by column), if it is
    /// in the grid.
    pub fn row_team(&self) -> Option<&ProcessGroup> {
        self.row_team.as_ref()
    }

    /// This process's column team (its grid column, ordered by row), if it
    /// is in the grid.
    pub fn col_team(&self) -> Option<&ProcessGroup> {
        self.col_team.as_ref()
    }

    /// Every in-grid rank, in column-major walk order.
    pub fn all_team(&self) -> &ProcessGroup {
        &self.all_team
    }

    /// Member index of cell `(row, col)` within [`Self::all_team`].
    pub fn all_member(&self, row: usize, col: usize) -> usize {
        row + col * self.height
    }

    /// The diagonal team with the given column offset: the cells
    /// `(i % height, (i + offset) % width)` for `i` up to
    /// `lcm(height, width)`, ordered by path position.
    ///
    /// Every process derives the identical member list without
    /// communication; processes off the path receive `None`.
    pub fn diagonal_team(&self, offset: usize) -> Option<ProcessGroup> {
        let path = self.diagonal_path(offset);
        let Some(my) = self.coord else { return None };
        if !path
            .iter()
            .any(|&(row, col)| (row, col) == my)
        {
            return None;
        }
        Some(ProcessGroup::new(
            self.transport.clone(),
            path.iter().map(|&(row, col)| self.rank_of(row, col)).collect(),
        ))
    }

    fn diagonal_path(&self, offset: usize) -> Vec<(usize, usize)> {
        let lcm = {
            let (mut a, mut b) = (self.height, self.width);
            while b != 0 {
                (a, b) = (b, a % b);
            }
            self.height / a * self.width
        };
        (0..lcm)
            .map(|i| (i % self.height, (i + offset) % self.width))
            .collect()
    }
}
