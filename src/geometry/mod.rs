//! Clip-space geometry: the runtime vertex type, triangle/winding math,
//! and the Sutherland-Hodgman clipper.

pub mod clip;
pub mod triangle;
pub mod vertex;

pub use self::clip::{clip_triangle, fan_triangulate};
pub use self::triangle::{edge_function, is_top_left_edge, Triangle};
pub use self::vertex::{MeshVertex, Vertex, INLINE_LIGHTS};
