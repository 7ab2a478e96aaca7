//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use half::f16;

use crate::ErrPack;
use crate::gpu::backend::{Backend, ExecutorError, check_rank, check_shader_dtype};
use crate::gpu::kernels::unary_op::UnaryOpProgram;
use crate::gpu::shader::ops;
use crate::tensor::{DType, HasDType, TensorInfo};

//--------------------------------------------------------------------------------------------------

/// Converts `input` to `dtype`.
///
/// The value is rounded to `dtype` in the input's precision and stored into an
/// output buffer of `dtype`.
pub fn cast<B: Backend + ?Sized>(
	input: &TensorInfo,
	dtype: DType,
	backend: &B,
) -> Result<TensorInfo, ErrPack<ExecutorError>> {
	check_shader_dtype(input.dtype)?;
	check_shader_dtype(dtype)?;
	check_rank(&input.shape)?;
	let program = UnaryOpProgram::new(&input.shape, ops::round_to(dtype), input.dtype, dtype);
	let descriptor = program.descriptor();
	let output = backend.make_output(&input.shape, dtype)?;
	backend.compile_and_run(&descriptor, &[input], output)
}

/// Converts `input` to half precision.
pub fn float16<B: Backend + ?Sized>(
	input: &TensorInfo,
	backend: &B,
) -> Result<TensorInfo, ErrPack<ExecutorError>> {
	cast(input, f16::dtype, backend)
}

//--------------------------------------------------------------------------------------------------
