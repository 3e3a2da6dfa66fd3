//! Filepath: src/vector.rs
//!
//! Fixed-width `f32` vector with SIMD-accelerated arithmetic.
//!
//! A [`Vector`] is the payload the tree quantizes: `dims` single-precision
//! components, stored in arena memory padded to a multiple of [`LANES`]
//! floats so every operation can run whole SIMD registers without tail
//! handling. Padding lanes are zero at construction and every operation
//! preserves that, which keeps horizontal sums equal to the logical
//! `dims`-lane sum.
//!
//! # Architecture Support
//!
//! - **`x86_64`** with AVX2+FMA: 8 floats per instruction (runtime detection)
//! - **Other**: scalar loop over the padded width
//!
//! # Accumulation Order
//!
//! `distance_squared` accumulates lane-wise into one 8-wide register across
//! the padded width and performs a single horizontal sum at the end. The
//! scalar fallback sums in ascending index order. The two backends may
//! therefore disagree in the last ulps; neither order is part of the
//! contract.
//!
//! # Concurrent Mutation
//!
//! Mutating operations take `&self` and write through an interior raw
//! pointer. Centroids on the insert path are updated by concurrent threads
//! without locking; the resulting lane-level races produce the bounded
//! centroid drift the tree documents, never memory unsafety at the
//! container level. Code that needs exclusive access (construction, splits
//! under the tree-wide lock) simply has it by protocol.

use std::fmt;
use std::ptr::NonNull;

use crate::arena::Arena;

/// Floats per SIMD register. Storage is padded to a multiple of this.
pub const LANES: usize = 8;

/// Round `dims` up to the padded storage width.
#[inline]
#[must_use]
pub const fn padded_width(dims: usize) -> usize {
    dims.next_multiple_of(LANES)
}

/// A fixed-width vector of `f32` components in arena storage.
pub struct Vector {
    /// Logical component count. Every vector in one tree shares this.
    dims: usize,
    /// `padded_width(dims)` floats; lanes past `dims` stay zero.
    values: NonNull<f32>,
}

// SAFETY: The component storage is only reached through the interior raw
// pointer, never through `&mut` references that could alias. Concurrent
// lane updates are tolerated by the tree's drift contract.
unsafe impl Send for Vector {}
unsafe impl Sync for Vector {}

impl Vector {
    /// Allocate a zero-filled vector of `dims` components in `arena`.
    ///
    /// # Panics
    /// Panics if `dims` is zero.
    pub fn zeroed_in(arena: &Arena, dims: usize) -> &mut Self {
        assert!(dims > 0, "vector must have at least one dimension");

        let floats = padded_width(dims);
        let values = arena.alloc(floats * std::mem::size_of::<f32>()).cast::<f32>();
        let vector = arena.place(Self { dims, values });

        // SAFETY: `place` returned a fresh exclusive allocation.
        unsafe { &mut *vector }
    }

    /// Allocate a vector initialized from `components`.
    ///
    /// # Panics
    /// Panics if `components` is empty.
    pub fn from_slice_in<'a>(arena: &'a Arena, components: &[f32]) -> &'a mut Self {
        let vector = Self::zeroed_in(arena, components.len());
        vector.as_mut_slice().copy_from_slice(components);
        vector
    }

    /// Allocate a zero-filled vector with the same width as `self`.
    pub fn zeroed_like_in<'a>(&self, arena: &'a Arena) -> &'a mut Self {
        Self::zeroed_in(arena, self.dims)
    }

    /// Logical component count.
    #[inline]
    #[must_use]
    pub const fn dims(&self) -> usize {
        self.dims
    }

    /// The logical components as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        // SAFETY: values points at padded_width(dims) >= dims floats.
        unsafe { std::slice::from_raw_parts(self.values.as_ptr(), self.dims) }
    }

    /// The logical components as a mutable slice.
    ///
    /// Exclusive access is guaranteed by `&mut self`; writes here cannot
    /// disturb the zero padding.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        // SAFETY: values points at padded_width(dims) >= dims floats and
        // `&mut self` proves exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.values.as_ptr(), self.dims) }
    }

    #[inline]
    fn padded(&self) -> usize {
        padded_width(self.dims)
    }

    #[inline]
    fn ptr(&self) -> *mut f32 {
        self.values.as_ptr()
    }

    // ========================================================================
    //  Arithmetic
    // ========================================================================

    /// Squared Euclidean distance to `other`.
    ///
    /// # Panics
    /// Debug-panics on a width mismatch.
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f32 {
        debug_assert_eq!(self.dims, other.dims, "vector width mismatch");

        #[cfg(target_arch = "x86_64")]
        if avx2_available() {
            // SAFETY: avx2_available() checked the required CPU features.
            return unsafe { avx2::distance_squared(self.ptr(), other.ptr(), self.padded()) };
        }

        // SAFETY: both vectors own padded() floats of storage.
        unsafe { scalar::distance_squared(self.ptr(), other.ptr(), self.padded()) }
    }

    /// `self += other`, lane-wise.
    pub fn add_assign(&self, other: &Self) {
        debug_assert_eq!(self.dims, other.dims, "vector width mismatch");

        #[cfg(target_arch = "x86_64")]
        if avx2_available() {
            // SAFETY: avx2_available() checked the required CPU features.
            unsafe { avx2::add_assign(self.ptr(), other.ptr(), self.padded()) };
            return;
        }

        // SAFETY: both vectors own padded() floats of storage.
        unsafe { scalar::add_assign(self.ptr(), other.ptr(), self.padded()) };
    }

    /// `self /= divisor`, lane-wise. Padding stays zero since `0 / k == 0`.
    pub fn div_assign(&self, divisor: f32) {
        #[cfg(target_arch = "x86_64")]
        if avx2_available() {
            // SAFETY: avx2_available() checked the required CPU features.
            unsafe { avx2::div_assign(self.ptr(), divisor, self.padded()) };
            return;
        }

        // SAFETY: the vector owns padded() floats of storage.
        unsafe { scalar::div_assign(self.ptr(), divisor, self.padded()) };
    }

    /// `self += other * factor`, lane-wise.
    pub fn fused_multiply_add(&self, other: &Self, factor: f32) {
        debug_assert_eq!(self.dims, other.dims, "vector width mismatch");

        #[cfg(target_arch = "x86_64")]
        if avx2_available() {
            // SAFETY: avx2_available() checked the required CPU features.
            unsafe { avx2::fused_multiply_add(self.ptr(), other.ptr(), factor, self.padded()) };
            return;
        }

        // SAFETY: both vectors own padded() floats of storage.
        unsafe { scalar::fused_multiply_add(self.ptr(), other.ptr(), factor, self.padded()) };
    }

    /// `self += (other - self) / divisor`, lane-wise.
    ///
    /// This is the running-mean update: folding one more sample into a mean
    /// over `divisor - 1` existing samples.
    pub fn fused_subtract_divide(&self, other: &Self, divisor: f32) {
        debug_assert_eq!(self.dims, other.dims, "vector width mismatch");

        #[cfg(target_arch = "x86_64")]
        if avx2_available() {
            // SAFETY: avx2_available() checked the required CPU features.
            unsafe { avx2::fused_subtract_divide(self.ptr(), other.ptr(), divisor, self.padded()) };
            return;
        }

        // SAFETY: both vectors own padded() floats of storage.
        unsafe { scalar::fused_subtract_divide(self.ptr(), other.ptr(), divisor, self.padded()) };
    }

    /// Set every lane (padding included) to zero.
    pub fn zero(&self) {
        // SAFETY: values points at padded() floats.
        unsafe { std::ptr::write_bytes(self.ptr(), 0, self.padded()) };
    }

    /// Copy all lanes of `src` into `self`.
    pub fn copy_from(&self, src: &Self) {
        debug_assert_eq!(self.dims, src.dims, "vector width mismatch");

        // SAFETY: both point at padded() floats; distinct vectors never
        // share storage (the arena hands out disjoint allocations).
        unsafe { std::ptr::copy_nonoverlapping(src.ptr(), self.ptr(), self.padded()) };
    }
}

impl fmt::Display for Vector {
    /// Components separated by single spaces, in the shortest round-trip
    /// `f32` form. This is the serialized centroid format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in self.as_slice() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vector")
            .field("dims", &self.dims)
            .field("values", &self.as_slice())
            .finish()
    }
}

// ============================================================================
//  Backend Dispatch
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[inline]
fn avx2_available() -> bool {
    // FMA ships with every AVX2 part that matters; require both so the
    // fused operations stay fused.
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

// ============================================================================
//  Scalar Fallback (always available)
// ============================================================================

mod scalar {
    /// # Safety
    /// Pointers must be valid for `width` floats.
    pub unsafe fn distance_squared(a: *const f32, b: *const f32, width: usize) -> f32 {
        let mut total = 0.0f32;
        for i in 0..width {
            // SAFETY: caller passes pointers valid for `width` floats.
            let diff = unsafe { *a.add(i) - *b.add(i) };
            total += diff * diff;
        }
        total
    }

    /// # Safety
    /// Pointers must be valid for `width` floats.
    pub unsafe fn add_assign(dst: *mut f32, src: *const f32, width: usize) {
        for i in 0..width {
            // SAFETY: caller passes pointers valid for `width` floats.
            unsafe { *dst.add(i) += *src.add(i) };
        }
    }

    /// # Safety
    /// The pointer must be valid for `width` floats.
    pub unsafe fn div_assign(dst: *mut f32, divisor: f32, width: usize) {
        for i in 0..width {
            // SAFETY: caller passes a pointer valid for `width` floats.
            unsafe { *dst.add(i) /= divisor };
        }
    }

    /// # Safety
    /// Pointers must be valid for `width` floats.
    pub unsafe fn fused_multiply_add(dst: *mut f32, src: *const f32, factor: f32, width: usize) {
        for i in 0..width {
            // SAFETY: caller passes pointers valid for `width` floats.
            unsafe { *dst.add(i) = (*src.add(i)).mul_add(factor, *dst.add(i)) };
        }
    }

    /// # Safety
    /// Pointers must be valid for `width` floats.
    pub unsafe fn fused_subtract_divide(dst: *mut f32, src: *const f32, divisor: f32, width: usize) {
        for i in 0..width {
            // SAFETY: caller passes pointers valid for `width` floats.
            unsafe {
                let current = *dst.add(i);
                *dst.add(i) = current + (*src.add(i) - current) / divisor;
            }
        }
    }
}

// ============================================================================
//  AVX2 Implementation (x86_64, runtime-detected)
// ============================================================================

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::{
        __m256, _mm256_add_ps, _mm256_castps256_ps128, _mm256_div_ps, _mm256_extractf128_ps,
        _mm256_fmadd_ps, _mm256_loadu_ps, _mm256_set1_ps, _mm256_setzero_ps, _mm256_storeu_ps,
        _mm256_sub_ps, _mm_add_ps, _mm_add_ss, _mm_cvtss_f32, _mm_movehdup_ps, _mm_movehl_ps,
    };

    use super::LANES;

    /// Horizontal sum of all 8 lanes.
    ///
    /// # Safety
    /// Caller must ensure AVX2 is available.
    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn horizontal_sum(v: __m256) -> f32 {
        // SAFETY: target_feature guarantees the intrinsics are valid here.
        unsafe {
            let high = _mm256_extractf128_ps(v, 1);
            let low = _mm256_castps256_ps128(v);
            let quad = _mm_add_ps(low, high);
            let dual = _mm_add_ps(quad, _mm_movehdup_ps(quad));
            let single = _mm_add_ss(dual, _mm_movehl_ps(dual, dual));
            _mm_cvtss_f32(single)
        }
    }

    /// # Safety
    /// Requires AVX2+FMA and pointers valid for `width` floats, with
    /// `width` a multiple of [`LANES`].
    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn distance_squared(a: *const f32, b: *const f32, width: usize) -> f32 {
        debug_assert_eq!(width % LANES, 0);

        // SAFETY: per the function contract.
        unsafe {
            let mut acc = _mm256_setzero_ps();
            let mut i = 0;
            while i < width {
                let diff = _mm256_sub_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)));
                acc = _mm256_fmadd_ps(diff, diff, acc);
                i += LANES;
            }
            horizontal_sum(acc)
        }
    }

    /// # Safety
    /// Requires AVX2 and pointers valid for `width` floats, with `width` a
    /// multiple of [`LANES`].
    #[target_feature(enable = "avx2")]
    pub unsafe fn add_assign(dst: *mut f32, src: *const f32, width: usize) {
        debug_assert_eq!(width % LANES, 0);

        // SAFETY: per the function contract.
        unsafe {
            let mut i = 0;
            while i < width {
                let sum = _mm256_add_ps(_mm256_loadu_ps(dst.add(i)), _mm256_loadu_ps(src.add(i)));
                _mm256_storeu_ps(dst.add(i), sum);
                i += LANES;
            }
        }
    }

    /// # Safety
    /// Requires AVX2 and a pointer valid for `width` floats, with `width`
    /// a multiple of [`LANES`].
    #[target_feature(enable = "avx2")]
    pub unsafe fn div_assign(dst: *mut f32, divisor: f32, width: usize) {
        debug_assert_eq!(width % LANES, 0);

        // SAFETY: per the function contract.
        unsafe {
            let factor = _mm256_set1_ps(divisor);
            let mut i = 0;
            while i < width {
                _mm256_storeu_ps(dst.add(i), _mm256_div_ps(_mm256_loadu_ps(dst.add(i)), factor));
                i += LANES;
            }
        }
    }

    /// # Safety
    /// Requires AVX2+FMA and pointers valid for `width` floats, with
    /// `width` a multiple of [`LANES`].
    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn fused_multiply_add(dst: *mut f32, src: *const f32, factor: f32, width: usize) {
        debug_assert_eq!(width % LANES, 0);

        // SAFETY: per the function contract.
        unsafe {
            let scale = _mm256_set1_ps(factor);
            let mut i = 0;
            while i < width {
                let result =
                    _mm256_fmadd_ps(_mm256_loadu_ps(src.add(i)), scale, _mm256_loadu_ps(dst.add(i)));
                _mm256_storeu_ps(dst.add(i), result);
                i += LANES;
            }
        }
    }

    /// # Safety
    /// Requires AVX2+FMA and pointers valid for `width` floats, with
    /// `width` a multiple of [`LANES`].
    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn fused_subtract_divide(dst: *mut f32, src: *const f32, divisor: f32, width: usize) {
        debug_assert_eq!(width % LANES, 0);

        // SAFETY: per the function contract.
        unsafe {
            let factor = _mm256_set1_ps(divisor);
            let mut i = 0;
            while i < width {
                let current = _mm256_loadu_ps(dst.add(i));
                let step = _mm256_div_ps(_mm256_sub_ps(_mm256_loadu_ps(src.add(i)), current), factor);
                _mm256_storeu_ps(dst.add(i), _mm256_add_ps(current, step));
                i += LANES;
            }
        }
    }

}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arena {
        Arena::with_slab_size(1 << 16)
    }

    /// Scalar oracle over logical components only.
    fn oracle_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn construction_pads_with_zeros() {
        let arena = arena();
        let v = Vector::from_slice_in(&arena, &[1.0, 2.0, 3.0]);

        assert_eq!(v.dims(), 3);
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0]);

        // Padding lanes are reachable through the raw storage and must be 0.
        for i in v.dims()..padded_width(v.dims()) {
            // SAFETY: storage extends to the padded width.
            unsafe { assert_eq!(*v.ptr().add(i), 0.0) };
        }
    }

    #[test]
    fn distance_squared_matches_oracle() {
        let arena = arena();
        let a = Vector::from_slice_in(&arena, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let b = Vector::from_slice_in(&arena, &[9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0]);

        let expected = oracle_distance(a.as_slice(), b.as_slice());
        assert_eq!(a.distance_squared(b), expected);
        assert_eq!(b.distance_squared(a), expected);
    }

    #[test]
    fn distance_squared_on_unpadded_width() {
        let arena = arena();
        // dims = 5 exercises the zero padding: a mismatch there would
        // corrupt the horizontal sum.
        let a = Vector::from_slice_in(&arena, &[1.0, 0.0, -2.0, 4.0, 0.5]);
        let b = Vector::from_slice_in(&arena, &[0.0, 1.0, 2.0, -4.0, 0.5]);

        let expected = oracle_distance(a.as_slice(), b.as_slice());
        assert!((a.distance_squared(b) - expected).abs() < 1e-5);
    }

    #[test]
    fn distance_to_self_is_zero() {
        let arena = arena();
        let a = Vector::from_slice_in(&arena, &[3.5, -1.25, 0.0, 7.0]);
        assert_eq!(a.distance_squared(a), 0.0);
    }

    #[test]
    fn add_and_div() {
        let arena = arena();
        let a = Vector::from_slice_in(&arena, &[1.0, 2.0, 3.0, 4.0]);
        let b = Vector::from_slice_in(&arena, &[4.0, 3.0, 2.0, 1.0]);

        a.add_assign(b);
        assert_eq!(a.as_slice(), &[5.0, 5.0, 5.0, 5.0]);

        a.div_assign(5.0);
        assert_eq!(a.as_slice(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn fused_multiply_add_accumulates() {
        let arena = arena();
        let acc = Vector::from_slice_in(&arena, &[1.0, 1.0, 1.0]);
        let x = Vector::from_slice_in(&arena, &[2.0, 4.0, 8.0]);

        acc.fused_multiply_add(x, 3.0);
        assert_eq!(acc.as_slice(), &[7.0, 13.0, 25.0]);
    }

    #[test]
    fn fused_subtract_divide_is_running_mean() {
        let arena = arena();
        // Mean of {2, 4} is 3; folding in 9 as the third sample gives 5.
        let mean = Vector::from_slice_in(&arena, &[3.0]);
        let sample = Vector::from_slice_in(&arena, &[9.0]);

        mean.fused_subtract_divide(sample, 3.0);
        assert_eq!(mean.as_slice(), &[5.0]);
    }

    #[test]
    fn zero_and_copy() {
        let arena = arena();
        let a = Vector::from_slice_in(&arena, &[1.0, 2.0, 3.0]);
        let b = a.zeroed_like_in(&arena);

        b.copy_from(a);
        assert_eq!(b.as_slice(), &[1.0, 2.0, 3.0]);

        b.zero();
        assert_eq!(b.as_slice(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn display_is_space_separated() {
        let arena = arena();
        let v = Vector::from_slice_in(&arena, &[1.0, 2.5, -3.0]);
        assert_eq!(v.to_string(), "1 2.5 -3");
    }

    #[test]
    fn operations_preserve_zero_padding() {
        let arena = arena();
        let a = Vector::from_slice_in(&arena, &[1.0, 2.0, 3.0]);
        let b = Vector::from_slice_in(&arena, &[4.0, 5.0, 6.0]);

        a.add_assign(b);
        a.fused_multiply_add(b, 2.0);
        a.fused_subtract_divide(b, 4.0);
        a.div_assign(2.0);

        for i in a.dims()..padded_width(a.dims()) {
            // SAFETY: storage extends to the padded width.
            unsafe { assert_eq!(*a.ptr().add(i), 0.0) };
        }
    }
}
