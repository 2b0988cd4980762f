// Value types that may live inside a segment.

/// A fixed-size value whose bytes mean the same thing in every process.
///
/// Records and keys are written by one process and copied out by another,
/// possibly mapped at a different base address, so they must not contain
/// pointers, references, or process-local handles (file descriptors, heap
/// allocations). `Copy` rules out drop glue; the rest is on the implementor.
///
/// # Safety
/// The type must be `#[repr(C)]` (or a primitive) and consist only of other
/// `Flat` fields.
pub unsafe trait Flat: Copy + Send + Sync + 'static {}

macro_rules! impl_flat {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl Flat for $t {})*
    };
}

impl_flat!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64, bool, char, ());

unsafe impl<T: Flat, const N: usize> Flat for [T; N] {}

/// Offset of a block inside a segment.
///
/// The only way shared structures refer to each other. It is turned into an
/// address by the segment of the process using it, at the point of use, and
/// the result is never kept across a lock release.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// No block. Offset 0 is inside the header, so no allocation returns it.
    pub const NULL: Handle = Handle(0);

    #[inline]
    pub const fn from_offset(offset: u64) -> Self {
        Handle(offset)
    }

    #[inline]
    pub const fn offset(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}
