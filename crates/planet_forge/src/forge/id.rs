//! Chunk identity and placement on the cube-sphere.

use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;

use glam::{DQuat, DVec3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One of the six faces of the cube projected onto the sphere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Backward,
}

impl Direction {
    /// All faces, in index order.
    pub const ALL: [Direction; 6] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
        Direction::Forward,
        Direction::Backward,
    ];

    /// Face index in `0..6`.
    pub const fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
            Direction::Forward => 4,
            Direction::Backward => 5,
        }
    }

    /// Face for an index in `0..6`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Rotation taking the local `+Z` face onto this face.
    pub fn rotation(self) -> DQuat {
        match self {
            Direction::Up => DQuat::from_rotation_x(-FRAC_PI_2),
            Direction::Down => DQuat::from_rotation_x(FRAC_PI_2),
            Direction::Left => DQuat::from_rotation_y(-FRAC_PI_2),
            Direction::Right => DQuat::from_rotation_y(FRAC_PI_2),
            Direction::Forward => DQuat::IDENTITY,
            Direction::Backward => DQuat::from_rotation_y(PI),
        }
    }

    /// Outward unit normal of the face.
    pub fn normal(self) -> DVec3 {
        match self {
            Direction::Up => DVec3::Y,
            Direction::Down => DVec3::NEG_Y,
            Direction::Left => DVec3::NEG_X,
            Direction::Right => DVec3::X,
            Direction::Forward => DVec3::Z,
            Direction::Backward => DVec3::NEG_Z,
        }
    }
}

/// Position of a node inside one face quadtree.
///
/// At depth `lod` the face is split into `2^lod × 2^lod` cells and `(x, y)`
/// addresses one of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChunkIndices {
    pub lod: u32,
    pub x: u32,
    pub y: u32,
}

impl ChunkIndices {
    /// The whole face.
    pub const ROOT: ChunkIndices = ChunkIndices { lod: 0, x: 0, y: 0 };

    pub const fn new(lod: u32, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    /// Number of cells along one edge of the face at this depth.
    pub fn cells_per_edge(&self) -> f64 {
        2f64.powi(self.lod as i32)
    }

    /// Edge length of the chunk on a cube of half-extent `radius`.
    pub fn side_length(&self, radius: f64) -> f64 {
        2.0 * radius / self.cells_per_edge()
    }

    /// Centre of the chunk on the cube of half-extent `radius`.
    pub fn position_on_cube(&self, direction: Direction, radius: f64) -> DVec3 {
        let cells = self.cells_per_edge();
        let local = DVec3::new(
            -radius + 2.0 * radius * (self.x as f64 + 0.5) / cells,
            -radius + 2.0 * radius * (self.y as f64 + 0.5) / cells,
            radius,
        );
        direction.rotation() * local
    }

    /// [`position_on_cube`](Self::position_on_cube) projected onto the sphere.
    pub fn position_on_sphere(&self, direction: Direction, radius: f64) -> DVec3 {
        self.position_on_cube(direction, radius).normalize() * radius
    }

    /// The four subdivided cells, row by row.
    pub fn children(&self) -> [ChunkIndices; 4] {
        let (lod, x, y) = (self.lod + 1, self.x * 2, self.y * 2);
        [
            ChunkIndices::new(lod, x, y),
            ChunkIndices::new(lod, x + 1, y),
            ChunkIndices::new(lod, x, y + 1),
            ChunkIndices::new(lod, x + 1, y + 1),
        ]
    }

    /// The enclosing cell, `None` at the root.
    pub fn parent(&self) -> Option<ChunkIndices> {
        (self.lod > 0).then(|| ChunkIndices::new(self.lod - 1, self.x / 2, self.y / 2))
    }
}

/// Identity of one quadtree node of one planet.
///
/// The display form is stable and can be used as a string key:
///
/// ```
/// use planet_forge::forge::{ChunkId, ChunkIndices, Direction};
///
/// let id = ChunkId::new(7, Direction::Right, ChunkIndices::new(2, 1, 3));
/// assert_eq!(id.to_string(), "7->d3->l2->[x1;y3]");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChunkId {
    /// Identity of the planet owning the quadtree.
    pub root: u64,
    pub direction: Direction,
    pub indices: ChunkIndices,
}

impl ChunkId {
    pub const fn new(root: u64, direction: Direction, indices: ChunkIndices) -> Self {
        Self {
            root,
            direction,
            indices,
        }
    }

    /// Root node of one face.
    pub const fn face(root: u64, direction: Direction) -> Self {
        Self::new(root, direction, ChunkIndices::ROOT)
    }

    pub fn lod(&self) -> u32 {
        self.indices.lod
    }

    /// Ids of the four subdivided chunks.
    pub fn children(&self) -> [ChunkId; 4] {
        self.indices
            .children()
            .map(|indices| ChunkId::new(self.root, self.direction, indices))
    }

    /// Id of the enclosing chunk, `None` for a face root.
    pub fn parent(&self) -> Option<ChunkId> {
        self.indices
            .parent()
            .map(|indices| ChunkId::new(self.root, self.direction, indices))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->d{}->l{}->[x{};y{}]",
            self.root,
            self.direction.index(),
            self.indices.lod,
            self.indices.x,
            self.indices.y
        )
    }
}
