//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use arrayvec::ArrayVec;

use crate::tensor::MAX_RANK;

//--------------------------------------------------------------------------------------------------

/// Number of invocations in one workgroup along `x`, `y`, `z`.
pub type WorkGroupSize = [u32; 3];

/// Number of output elements each invocation handles along `x`, `y`, `z`.
pub type WorkPerThread = [u32; 3];

/// Number of workgroups launched along `x`, `y`, `z`.
pub type DispatchSize = [u32; 3];

pub type Axes = ArrayVec<usize, MAX_RANK>;

/// Assigns output dimensions to dispatch axes.
///
/// A dispatch axis may fold several output dimensions. In that case the dimensions
/// are listed from the outermost to the innermost, and the invocation index along
/// that axis is unfolded in row-major order.
///
/// Every output dimension must appear in exactly one bucket.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct DispatchLayout {
	pub x: Axes,
	pub y: Axes,
	pub z: Axes,
}

impl DispatchLayout {
	pub fn new(x: &[usize], y: &[usize], z: &[usize]) -> Self {
		assert!(x.len() + y.len() + z.len() <= MAX_RANK);
		Self {
			x: x.iter().copied().collect(),
			y: y.iter().copied().collect(),
			z: z.iter().copied().collect(),
		}
	}

	/// All dimensions map to `x`. Used by kernels that address the output by flat index only.
	pub fn flat(rank: usize) -> Self {
		assert!(rank <= MAX_RANK);
		Self {
			x: (0..rank).collect(),
			y: Axes::new(),
			z: Axes::new(),
		}
	}

	pub fn axes(&self) -> [&[usize]; 3] {
		[&self.x, &self.y, &self.z]
	}

	/// Checks that the buckets partition `0..rank`.
	pub fn is_partition_of(&self, rank: usize) -> bool {
		let mut seen = [false; MAX_RANK];
		let mut count = 0;
		for &dim in self.axes().iter().flat_map(|axes| axes.iter()) {
			match seen.get_mut(dim) {
				Some(seen) if dim < rank && !*seen => {
					*seen = true;
					count += 1;
				},
				_ => return false,
			}
		}
		count == rank
	}

	/// Product of the output extents assigned to each dispatch axis.
	///
	/// An axis with no dimensions counts as 1.
	pub fn axis_elems(&self, shape: &[usize]) -> [usize; 3] {
		self.axes().map(|axes| axes.iter().map(|&dim| shape[dim]).product())
	}

	/// Output coordinates of the invocation with the global id `global_id`.
	///
	/// Folded dimensions are unfolded in row-major order. The outermost dimension
	/// of each axis absorbs the rest of the index without wrapping, so invocations
	/// past the end of the output get out of range coordinates.
	pub fn invocation_coords(&self, shape: &[usize], global_id: [u32; 3]) -> Axes {
		let mut coords: Axes = (0..shape.len()).map(|_| 0).collect();
		for (axis, dims) in self.axes().into_iter().enumerate() {
			let mut rem = global_id[axis] as usize;
			for (i, &dim) in dims.iter().enumerate() {
				let stride: usize = dims[i + 1..].iter().map(|&d| shape[d]).product();
				debug_assert!(stride > 0);
				coords[dim] = rem / stride;
				rem -= coords[dim] * stride;
			}
		}
		coords
	}
}

impl std::fmt::Debug for DispatchLayout {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{{x: {:?}, y: {:?}, z: {:?}}}",
			self.x.as_slice(),
			self.y.as_slice(),
			self.z.as_slice()
		)
	}
}

pub fn flat_dispatch_layout(shape: &[usize]) -> DispatchLayout {
	DispatchLayout::flat(shape.len())
}

//--------------------------------------------------------------------------------------------------

/// Computes the number of workgroups needed to cover `output_shape`.
///
///     dispatch[axis] = ceil(axis_elems[axis] / (workgroup_size[axis] * work_per_thread[axis]))
pub fn compute_dispatch(
	layout: &DispatchLayout,
	output_shape: &[usize],
	workgroup_size: WorkGroupSize,
	work_per_thread: WorkPerThread,
) -> DispatchSize {
	debug_assert!(layout.is_partition_of(output_shape.len()));
	let elems = layout.axis_elems(output_shape);
	std::array::from_fn(|axis| {
		let per_group = workgroup_size[axis] as usize * work_per_thread[axis] as usize;
		debug_assert!(per_group > 0);
		u32::try_from(elems[axis].div_ceil(per_group)).unwrap_or(u32::MAX)
	})
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_flat_fit() {
		let shape = [256];
		let layout = flat_dispatch_layout(&shape);
		assert_eq!(compute_dispatch(&layout, &shape, [128, 1, 1], [1, 1, 1]), [2, 1, 1]);
	}

	#[test]
	fn test_flat_no_fit() {
		let shape = [300];
		let layout = flat_dispatch_layout(&shape);
		assert_eq!(compute_dispatch(&layout, &shape, [128, 1, 1], [2, 1, 1]), [2, 1, 1]);
		assert_eq!(compute_dispatch(&layout, &shape, [128, 1, 1], [1, 1, 1]), [3, 1, 1]);
	}

	#[test]
	fn test_folded_layout() {
		let shape = [2, 5, 9, 3];
		let layout = DispatchLayout::new(&[2], &[1], &[0, 3]);
		assert!(layout.is_partition_of(4));
		assert_eq!(layout.axis_elems(&shape), [9, 5, 6]);
		assert_eq!(compute_dispatch(&layout, &shape, [4, 4, 4], [1, 1, 1]), [3, 2, 2]);
	}

	#[test]
	fn test_invocation_coords() {
		let shape = [2, 5, 9, 3];
		let layout = DispatchLayout::new(&[2], &[1], &[0, 3]);
		assert_eq!(layout.invocation_coords(&shape, [7, 4, 5]).as_slice(), &[1, 4, 7, 2]);
		assert_eq!(layout.invocation_coords(&shape, [0, 0, 0]).as_slice(), &[0, 0, 0, 0]);
		// past the end of the folded axis, the outer dimension is out of range
		assert_eq!(layout.invocation_coords(&shape, [0, 0, 7]).as_slice(), &[2, 0, 0, 1]);

		let flat = DispatchLayout::flat(3);
		let shape = [2, 3, 4];
		assert_eq!(flat.invocation_coords(&shape, [17, 0, 0]).as_slice(), &[1, 1, 1]);
	}

	#[test]
	fn test_partition() {
		assert!(DispatchLayout::flat(3).is_partition_of(3));
		assert!(DispatchLayout::flat(0).is_partition_of(0));
		assert!(!DispatchLayout::new(&[0], &[0], &[]).is_partition_of(1));
		assert!(!DispatchLayout::new(&[0], &[], &[]).is_partition_of(2));
		assert!(!DispatchLayout::new(&[0, 3], &[], &[]).is_partition_of(2));
	}

	#[test]
	fn test_dispatch_covers_and_is_minimal() {
		let wgs: [WorkGroupSize; 3] = [[128, 1, 1], [4, 4, 4], [64, 2, 1]];
		for wg in wgs {
			for wpt in [1, 2, 3] {
				for a in 1..20 {
					for b in [1, 3, 7, 130] {
						let shape = [a, b, 3];
						let layout = DispatchLayout::new(&[2], &[1], &[0]);
						let wpt = [wpt, 1, 1];
						let dispatch = compute_dispatch(&layout, &shape, wg, wpt);
						assert_eq!(dispatch, compute_dispatch(&layout, &shape, wg, wpt));
						let elems = layout.axis_elems(&shape);
						for axis in 0..3 {
							let per_group = (wg[axis] * wpt[axis]) as usize;
							let d = dispatch[axis] as usize;
							assert!(d * per_group >= elems[axis]);
							assert!(d == 0 || (d - 1) * per_group < elems[axis]);
						}
					}
				}
			}
		}
	}

	#[test]
	fn test_empty_axis_counts_as_one() {
		let shape = [10];
		let layout = flat_dispatch_layout(&shape);
		assert_eq!(layout.axis_elems(&shape), [10, 1, 1]);
		assert_eq!(compute_dispatch(&layout, &shape, [4, 4, 4], [1, 1, 1]), [3, 1, 1]);
	}
}
