//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::gpu::dispatch::WorkGroupSize;

//--------------------------------------------------------------------------------------------------

/// Tuning knobs of the program generators.
///
/// All values end up as literals in the generated source, so programs built
/// with different configs get different shader keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
	/// Workgroup size of the elementwise kernels. The workgroup is `[x, 1, 1]`.
	pub unary_workgroup_x: u32,

	/// Elements per invocation when the output size is not a multiple of
	/// `unary_workgroup_x`.
	pub remainder_work_per_thread: u32,

	pub resize_workgroup: WorkGroupSize,
}

impl KernelConfig {
	// TODO: pick the elementwise workgroup size per adapter instead of a fixed 128.
	pub const DEFAULT: Self = Self {
		unary_workgroup_x: 128,
		remainder_work_per_thread: 2,
		resize_workgroup: [4, 4, 4],
	};
}

impl Default for KernelConfig {
	fn default() -> Self {
		Self::DEFAULT
	}
}
