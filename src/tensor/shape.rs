//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::ops::Deref;

use smallvec::SmallVec;

//--------------------------------------------------------------------------------------------------
// Shapes handled by the kernels have at most 4 dimensions, so they always fit the inline storage.

pub const INLINE_DIMS: usize = 4;

/// Largest rank the shader generators accept.
///
/// Output coordinates are represented as WGSL vectors and those have at most 4 components.
pub const MAX_RANK: usize = 4;

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
	dims: SmallVec<[usize; INLINE_DIMS]>,
}

impl Shape {
	pub fn new(dims: &[usize]) -> Self {
		Self { dims: SmallVec::from_slice(dims) }
	}

	pub fn scalar() -> Self {
		Self { dims: SmallVec::new() }
	}

	pub fn ndim(&self) -> usize {
		self.dims.len()
	}

	/// Number of elements. A rank-0 shape has one element.
	pub fn elems(&self) -> usize {
		self.dims.iter().product()
	}

	/// Row-major strides in elements.
	pub fn strides(&self) -> SmallVec<[usize; INLINE_DIMS]> {
		let mut strides: SmallVec<[usize; INLINE_DIMS]> = SmallVec::from_elem(1, self.ndim());
		let mut acc = 1;
		for (stride, &size) in strides.iter_mut().zip(self.dims.iter()).rev() {
			*stride = acc;
			acc *= size;
		}
		strides
	}

	/// Converts a flat row-major index to per-dimension coordinates.
	pub fn coords_from_flat_index(&self, mut index: usize) -> SmallVec<[usize; INLINE_DIMS]> {
		let strides = self.strides();
		let mut coords: SmallVec<[usize; INLINE_DIMS]> = SmallVec::with_capacity(self.ndim());
		for stride in strides {
			coords.push(index / stride);
			index %= stride;
		}
		coords
	}

	/// Inverse of `coords_from_flat_index()`.
	pub fn flat_index(&self, coords: &[usize]) -> usize {
		debug_assert!(coords.len() == self.ndim());
		coords.iter().zip(self.strides()).map(|(c, s)| c * s).sum()
	}
}

impl Deref for Shape {
	type Target = [usize];

	fn deref(&self) -> &[usize] {
		&self.dims
	}
}

impl From<&[usize]> for Shape {
	fn from(dims: &[usize]) -> Self {
		Self::new(dims)
	}
}

impl<const N: usize> From<[usize; N]> for Shape {
	fn from(dims: [usize; N]) -> Self {
		Self::new(&dims)
	}
}

impl<const N: usize> From<&[usize; N]> for Shape {
	fn from(dims: &[usize; N]) -> Self {
		Self::new(dims)
	}
}

impl std::fmt::Debug for Shape {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self.dims.as_slice())
	}
}

impl std::fmt::Display for Shape {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "[")?;
		for (i, dim) in self.dims.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{dim}")?;
		}
		write!(f, "]")
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_strides_and_coords() {
		let shape = Shape::new(&[2, 3, 4]);
		assert_eq!(shape.elems(), 24);
		assert_eq!(shape.strides().as_slice(), &[12, 4, 1]);
		assert_eq!(shape.coords_from_flat_index(17).as_slice(), &[1, 1, 1]);
		assert_eq!(shape.flat_index(&[1, 1, 1]), 17);
		for i in 0..shape.elems() {
			assert_eq!(shape.flat_index(&shape.coords_from_flat_index(i)), i);
		}
	}

	#[test]
	fn test_scalar_shape() {
		let shape = Shape::scalar();
		assert_eq!(shape.ndim(), 0);
		assert_eq!(shape.elems(), 1);
		assert_eq!(shape.to_string(), "[]");
		assert_eq!(Shape::from([2, 2]).to_string(), "[2, 2]");
	}
}
