//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use smallvec::{SmallVec, smallvec};

use crate::gpu::dispatch::{DispatchLayout, DispatchSize, WorkGroupSize};
use crate::gpu::kernels::resize_bilinear::ResizeBilinearProgram;
use crate::gpu::kernels::unary_op::UnaryOpProgram;
use crate::gpu::shader::preprocessor::ShapeUniforms;
use crate::tensor::{DType, Shape};

//--------------------------------------------------------------------------------------------------

/// Everything the execution engine needs to compile and run one program.
///
/// The descriptor is a plain value. The engine compiles `source` (or reuses an
/// artifact compiled for an equal `shader_key`), binds `result` and the inputs
/// in the order of `variable_names`, fills `uniforms` if present, and launches
/// `dispatch` workgroups of `workgroup_size` invocations.
#[derive(Clone, Debug)]
pub struct ProgramDescriptor {
	pub output_shape: Shape,
	pub output_dtype: DType,

	/// Equal keys imply byte-identical `source`.
	pub shader_key: String,
	pub source: String,

	pub variable_names: SmallVec<[&'static str; 2]>,

	pub dispatch_layout: DispatchLayout,
	pub dispatch: DispatchSize,
	pub workgroup_size: WorkGroupSize,

	/// Values of the `uniforms` block, if the source declares one.
	/// They are bound at dispatch time and are not part of the key.
	pub uniforms: Option<ShapeUniforms>,

	/// The parameters the source was generated from.
	pub kind: ProgramKind,
}

impl ProgramDescriptor {
	/// Total number of invocations launched by the dispatch.
	pub fn invocations(&self) -> usize {
		self.dispatch
			.iter()
			.zip(self.workgroup_size.iter())
			.map(|(&d, &w)| d as usize * w as usize)
			.product()
	}
}

//--------------------------------------------------------------------------------------------------

/// The closed set of program generators.
///
/// Kernel selection lives outside of this crate. It picks a variant, fills in
/// the parameters and turns it into a descriptor.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgramKind {
	UnaryOp(UnaryOpProgram),
	ResizeBilinear(ResizeBilinearProgram),
}

impl ProgramKind {
	pub fn name(&self) -> &'static str {
		match self {
			Self::UnaryOp(_) => "unary",
			Self::ResizeBilinear(_) => "resize_bilinear",
		}
	}

	/// Expected dtypes of the inputs, in binding order.
	pub fn input_dtypes(&self) -> SmallVec<[DType; 2]> {
		match self {
			Self::UnaryOp(p) => smallvec![p.input_dtype],
			Self::ResizeBilinear(p) => smallvec![p.dtype],
		}
	}

	/// Expected shapes of the inputs, in binding order.
	pub fn input_shapes(&self) -> SmallVec<[Shape; 2]> {
		match self {
			Self::UnaryOp(p) => smallvec![p.output_shape.clone()],
			Self::ResizeBilinear(p) => smallvec![Shape::new(&p.input_shape)],
		}
	}

	pub fn descriptor(&self) -> ProgramDescriptor {
		match self {
			Self::UnaryOp(p) => p.descriptor(),
			Self::ResizeBilinear(p) => p.descriptor(),
		}
	}
}

impl From<UnaryOpProgram> for ProgramKind {
	fn from(p: UnaryOpProgram) -> Self {
		Self::UnaryOp(p)
	}
}

impl From<ResizeBilinearProgram> for ProgramKind {
	fn from(p: ResizeBilinearProgram) -> Self {
		Self::ResizeBilinear(p)
	}
}

//--------------------------------------------------------------------------------------------------
