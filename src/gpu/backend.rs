//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::gpu::program::ProgramDescriptor;
use crate::tensor::{DType, MAX_RANK, Shape, TensorInfo};
use crate::{ErrExtra, ErrPack};

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct AllocationFailedError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecutorError {
	/// The dtype has no shader representation.
	UnsupportedDType,
	ShapeMismatch,
	DTypeMismatch,
	InputCountMismatch,
	InvalidBuffer,
	OutOfBounds,

	/// Two programs with the same shader key produced different source.
	KeyCollision,
	AllocationFailed,
}

impl ExecutorError {
	#[cold]
	#[inline(never)]
	pub fn unsupported_dtype(dtype: DType) -> ErrPack<Self> {
		ErrPack::with_message(
			Self::UnsupportedDType,
			format!("dtype {dtype} cannot be used in a shader"),
		)
	}

	#[cold]
	#[inline(never)]
	pub fn shape_mismatch(expected: &Shape, actual: &Shape) -> ErrPack<Self> {
		ErrPack::with_message(
			Self::ShapeMismatch,
			format!("expected shape {expected}, got {actual}"),
		)
	}

	#[cold]
	#[inline(never)]
	pub fn rank_too_high(shape: &Shape) -> ErrPack<Self> {
		ErrPack::with_message(
			Self::ShapeMismatch,
			format!("shape {shape} has more than {MAX_RANK} dimensions"),
		)
	}

	#[cold]
	#[inline(never)]
	pub fn dtype_mismatch(expected: DType, actual: DType) -> ErrPack<Self> {
		ErrPack::with_message(Self::DTypeMismatch, format!("expected dtype {expected}, got {actual}"))
	}

	#[cold]
	#[inline(never)]
	pub fn input_count_mismatch(expected: usize, actual: usize) -> ErrPack<Self> {
		ErrPack::with_message(
			Self::InputCountMismatch,
			format!("program takes {expected} inputs, got {actual}"),
		)
	}

	#[cold]
	#[inline(never)]
	pub fn key_collision(key: &str) -> ErrPack<Self> {
		ErrPack::with_message(
			Self::KeyCollision,
			format!("shader key {key:?} maps to two different sources"),
		)
	}
}

impl From<AllocationFailedError> for ErrPack<ExecutorError> {
	#[cold]
	#[inline(never)]
	fn from(_: AllocationFailedError) -> Self {
		Self {
			code: ExecutorError::AllocationFailed,
			extra: Some(Box::new(ErrExtra {
				message: "failed to allocate the output buffer".into(),
				nested: None,
			})),
		}
	}
}

//--------------------------------------------------------------------------------------------------

/// Execution engine the kernels run on.
///
/// The engine owns the device buffers. Kernels only see `TensorInfo` handles and
/// describe the work with a `ProgramDescriptor`.
pub trait Backend {
	/// Allocates an uninitialized output tensor.
	fn make_output(&self, shape: &Shape, dtype: DType) -> Result<TensorInfo, ErrPack<ExecutorError>>;

	/// Compiles `program` (or reuses a cached compilation with the same shader key),
	/// binds `output` and `inputs` and runs it.
	///
	/// Returns `output` once the program has been submitted.
	fn compile_and_run(
		&self,
		program: &ProgramDescriptor,
		inputs: &[&TensorInfo],
		output: TensorInfo,
	) -> Result<TensorInfo, ErrPack<ExecutorError>>;
}

/// Fails with `UnsupportedDType` if `dtype` has no shader representation.
pub fn check_shader_dtype(dtype: DType) -> Result<(), ErrPack<ExecutorError>> {
	if dtype.wgsl_type().is_none() {
		return Err(ExecutorError::unsupported_dtype(dtype));
	}
	Ok(())
}

/// Fails with `ShapeMismatch` if the generated indexing cannot address `shape`.
pub fn check_rank(shape: &Shape) -> Result<(), ErrPack<ExecutorError>> {
	if shape.ndim() > MAX_RANK {
		return Err(ExecutorError::rank_too_high(shape));
	}
	Ok(())
}

//--------------------------------------------------------------------------------------------------
