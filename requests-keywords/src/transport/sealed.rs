//! Sealed trait marker for Transport implementations.

pub(crate) mod private {
    /// Sealed trait marker.
    ///
    /// Keeps `Transport` implementations inside this crate so redirect and
    /// buffering behaviour stays uniform.
    pub trait Sealed {}
}
