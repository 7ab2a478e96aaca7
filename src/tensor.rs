//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

pub mod dtype;
pub mod shape;

pub use dtype::{DType, DTypeId, DTypeKind, HasDType};
pub use shape::{MAX_RANK, Shape};

//--------------------------------------------------------------------------------------------------

/// Opaque handle to a device buffer. Only the backend that created it can interpret it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

/// Read-only tensor metadata as seen by the kernels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorInfo {
	pub shape: Shape,
	pub dtype: DType,
	pub buffer: BufferId,
}
