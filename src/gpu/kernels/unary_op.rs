//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use smallvec::smallvec;

use crate::ErrPack;
use crate::gpu::backend::{Backend, ExecutorError, check_rank, check_shader_dtype};
use crate::gpu::config::KernelConfig;
use crate::gpu::dispatch::{WorkGroupSize, compute_dispatch, flat_dispatch_layout};
use crate::gpu::program::{ProgramDescriptor, ProgramKind};
use crate::gpu::shader::preprocessor::{self, ShapeUniforms};
use crate::gpu::shader::{ScalarFn, SourceWriter};
use crate::tensor::{DType, MAX_RANK, Shape, TensorInfo};

//--------------------------------------------------------------------------------------------------

const INPUT: &str = "A";

/// Elementwise `output[i] = op(input[i])` over an output of up to 4 dimensions.
///
/// When the number of elements is a multiple of the workgroup size, each
/// invocation handles exactly one element by flat index (the fit branch).
/// Otherwise each invocation handles `work_per_thread` consecutive elements
/// and the ones past the end are skipped.
///
/// The op runs in the input precision. The result is converted to the output
/// dtype when it is stored.
#[derive(Clone, Debug, PartialEq)]
pub struct UnaryOpProgram {
	pub output_shape: Shape,
	pub op: ScalarFn,
	pub input_dtype: DType,
	pub output_dtype: DType,
	pub workgroup_size: WorkGroupSize,
	pub work_per_thread: u32,
	pub fit: bool,
}

impl UnaryOpProgram {
	pub fn new(output_shape: &Shape, op: ScalarFn, input_dtype: DType, output_dtype: DType) -> Self {
		Self::with_config(output_shape, op, input_dtype, output_dtype, &KernelConfig::DEFAULT)
	}

	pub fn with_config(
		output_shape: &Shape,
		op: ScalarFn,
		input_dtype: DType,
		output_dtype: DType,
		config: &KernelConfig,
	) -> Self {
		assert!(output_shape.ndim() <= MAX_RANK);
		assert!(config.unary_workgroup_x > 0 && config.remainder_work_per_thread > 0);
		let group = config.unary_workgroup_x as usize;
		let fit = output_shape.elems() % group == 0;
		Self {
			output_shape: output_shape.clone(),
			op,
			input_dtype,
			output_dtype,
			workgroup_size: [config.unary_workgroup_x, 1, 1],
			work_per_thread: if fit { 1 } else { config.remainder_work_per_thread },
			fit,
		}
	}

	/// Number of output elements.
	pub fn size(&self) -> usize {
		self.output_shape.elems()
	}

	pub fn rank(&self) -> usize {
		self.output_shape.ndim()
	}

	/// The no-fit branch reads the strides from a uniform block.
	/// Rank 1 outputs need no strides, so they get no block.
	pub fn uses_shape_uniforms(&self) -> bool {
		!self.fit && self.rank() > 1
	}

	pub fn descriptor(&self) -> ProgramDescriptor {
		let layout = flat_dispatch_layout(&self.output_shape);
		let dispatch = compute_dispatch(
			&layout,
			&self.output_shape,
			self.workgroup_size,
			[self.work_per_thread, 1, 1],
		);
		let (source, shader_key) = self.generate_source();
		log::debug!(
			"unary {}: shape={} {}->{} fit={} dispatch={dispatch:?}",
			self.op.name(),
			self.output_shape,
			self.input_dtype,
			self.output_dtype,
			self.fit,
		);
		log::trace!("unary {} source:\n{source}", self.op.name());
		ProgramDescriptor {
			output_shape: self.output_shape.clone(),
			output_dtype: self.output_dtype,
			shader_key,
			source,
			variable_names: smallvec![INPUT],
			dispatch_layout: layout,
			dispatch,
			workgroup_size: self.workgroup_size,
			uniforms: self.uses_shape_uniforms().then(|| ShapeUniforms::new(&self.output_shape)),
			kind: ProgramKind::UnaryOp(self.clone()),
		}
	}

	fn generate_source(&self) -> (String, String) {
		let working = self.input_dtype;
		let rank = self.rank();

		let mut w = SourceWriter::new("unary");
		let mut dtypes = self.op.dtypes();
		dtypes.extend([self.input_dtype, self.output_dtype]);
		preprocessor::enable_extensions(&mut w, &dtypes);
		let next_binding =
			preprocessor::storage_bindings(&mut w, self.output_dtype, &[(INPUT, self.input_dtype)]);

		w.param("fit", self.fit);
		if !self.fit {
			w.param("uniforms", self.uses_shape_uniforms());
			if self.uses_shape_uniforms() {
				preprocessor::shape_uniforms_decl(&mut w, rank, next_binding);
			}
			preprocessor::coords_from_flat_index_fn(&mut w, rank);
			preprocessor::get_at_out_coords_fn(&mut w, INPUT, working, rank);
		}
		preprocessor::set_output_flat_fn(&mut w, working, self.output_dtype);
		w.scalar_fn("unaryOperation", &self.op, working);
		w.line("");

		let [x, y, z] = self.workgroup_size.map(|size| w.lit(size));
		w.line(&format!("@compute @workgroup_size({x}, {y}, {z})"));
		w.open("fn main(@builtin(global_invocation_id) globalId: vec3<u32>) {");
		w.line("let index = i32(globalId.x);");
		if self.fit {
			w.line(&format!("let a = {INPUT}[index];"));
			w.line("setOutput(index, unaryOperation(a));");
		} else {
			let work = w.lit(self.work_per_thread);
			let size = w.lit(self.size());
			w.open(&format!("for (var i = 0; i < {work}; i++) {{"));
			w.line(&format!("let flatIndex = index * {work} + i;"));
			w.open(&format!("if (flatIndex < {size}) {{"));
			w.line("let coords = getCoordsFromFlatIndex(flatIndex);");
			w.line(&format!("let a = get{INPUT}AtOutCoords(coords);"));
			w.line("setOutput(flatIndex, unaryOperation(a));");
			w.close("}");
			w.close("}");
		}
		w.close("}");
		w.finish()
	}
}

//--------------------------------------------------------------------------------------------------

/// Applies `op` to every element of `input`. The output has the input's shape and dtype.
pub fn unary<B: Backend + ?Sized>(
	input: &TensorInfo,
	op: ScalarFn,
	backend: &B,
) -> Result<TensorInfo, ErrPack<ExecutorError>> {
	check_shader_dtype(input.dtype)?;
	check_rank(&input.shape)?;
	let program = UnaryOpProgram::new(&input.shape, op, input.dtype, input.dtype);
	let descriptor = program.descriptor();
	let output = backend.make_output(&input.shape, input.dtype)?;
	backend.compile_and_run(&descriptor, &[input], output)
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use half::f16;

	use super::*;
	use crate::gpu::shader::ops;
	use crate::tensor::HasDType;

	fn program(shape: &[usize], op: ScalarFn) -> UnaryOpProgram {
		UnaryOpProgram::new(&Shape::new(shape), op, f32::dtype, f32::dtype)
	}

	#[test]
	fn test_fit_branch() {
		let p = program(&[256], ops::relu());
		assert!(p.fit);
		assert_eq!(p.work_per_thread, 1);
		let d = p.descriptor();
		assert_eq!(d.dispatch, [2, 1, 1]);
		assert_eq!(d.workgroup_size, [128, 1, 1]);
		assert_eq!(d.invocations(), 256);
		assert!(d.uniforms.is_none());
		assert!(d.source.contains("@compute @workgroup_size(128, 1, 1)\n"));
		assert!(d.source.contains("\tlet a = A[index];\n\tsetOutput(index, unaryOperation(a));\n"));
		assert!(!d.source.contains("flatIndex <"));
		assert!(!d.source.contains("getCoordsFromFlatIndex"));
		assert!(!d.source.contains("enable f16;"));
	}

	#[test]
	fn test_no_fit_branch() {
		let p = program(&[300], ops::relu());
		assert!(!p.fit);
		assert_eq!(p.work_per_thread, 2);
		let d = p.descriptor();
		assert_eq!(d.dispatch, [2, 1, 1]);
		assert!(d.uniforms.is_none());
		assert!(d.source.contains("\tfor (var i = 0; i < 2; i++) {\n"));
		assert!(d.source.contains("\t\tlet flatIndex = index * 2 + i;\n"));
		assert!(d.source.contains("\t\tif (flatIndex < 300) {\n"));
		assert!(d.source.contains("\t\t\tlet a = getAAtOutCoords(coords);\n"));
	}

	#[test]
	fn test_no_fit_uses_shape_uniforms() {
		let p = program(&[3, 5, 7], ops::abs());
		let d = p.descriptor();
		assert!(d.source.contains("var<uniform> uniforms: Uniforms;"));
		assert!(d.source.contains("@group(0) @binding(2) var<uniform>"));
		let uniforms = d.uniforms.unwrap();
		assert_eq!(uniforms.out_shape.as_slice(), &[3, 5, 7]);
		assert_eq!(uniforms.out_shape_strides.as_slice(), &[35, 7]);
	}

	#[test]
	fn test_key_ignores_shape_when_source_does() {
		// same size, same rank, no fit: the shape only reaches the shader through uniforms
		let a = program(&[2, 3, 7], ops::relu()).descriptor();
		let b = program(&[3, 2, 7], ops::relu()).descriptor();
		assert_eq!(a.shader_key, b.shader_key);
		assert_eq!(a.source, b.source);
		assert_ne!(a.uniforms, b.uniforms);

		// both fit
		let a = program(&[2, 128], ops::relu()).descriptor();
		let b = program(&[4, 64], ops::relu()).descriptor();
		assert_eq!(a.shader_key, b.shader_key);
		assert_eq!(a.source, b.source);
	}

	#[test]
	fn test_key_tracks_source() {
		let descriptors = [
			program(&[256], ops::relu()).descriptor(),
			program(&[256], ops::relu6()).descriptor(),
			program(&[300], ops::relu()).descriptor(),
			program(&[301], ops::relu()).descriptor(),
			program(&[3, 100], ops::relu()).descriptor(),
			UnaryOpProgram::new(&Shape::new(&[256]), ops::relu(), f16::dtype, f16::dtype).descriptor(),
			UnaryOpProgram::new(&Shape::new(&[256]), ops::relu(), f32::dtype, f16::dtype).descriptor(),
		];
		for (i, x) in descriptors.iter().enumerate() {
			for y in &descriptors[i + 1..] {
				assert_ne!(x.source, y.source);
				assert_ne!(x.shader_key, y.shader_key);
			}
		}
	}

	#[test]
	fn test_f16_output() {
		let p = UnaryOpProgram::new(&Shape::new(&[2, 2]), ops::to_float16(), f32::dtype, f16::dtype);
		let d = p.descriptor();
		assert!(d.source.starts_with("enable f16;\n"));
		assert!(d.source.contains("var<storage, read_write> result: array<f16>;"));
		assert!(d.source.contains("var<storage, read> A: array<f32>;"));
		assert!(d.source.contains("\tresult[flatIndex] = f16(value);\n"));
		assert!(d.source.contains("\treturn f32(f16(a));\n"));
	}

	#[test]
	fn test_f16_in_op_body_enables_extension() {
		// f32 buffers, but the body converts through f16
		for shape in [&[256][..], &[300], &[3, 100]] {
			let d = program(shape, ops::to_float16()).descriptor();
			assert!(d.source.starts_with("enable f16;\n"), "{}", d.source);
			assert!(d.source.contains("\treturn f32(f16(a));\n"));
		}
		let d = program(&[256], ops::round_to(i32::dtype)).descriptor();
		assert!(!d.source.contains("enable f16;"));
	}

	#[test]
	fn test_config() {
		let config = KernelConfig {
			unary_workgroup_x: 64,
			remainder_work_per_thread: 4,
			..KernelConfig::DEFAULT
		};
		let shape = Shape::new(&[300]);
		let p = UnaryOpProgram::with_config(&shape, ops::neg(), f32::dtype, f32::dtype, &config);
		let d = p.descriptor();
		assert_eq!(d.dispatch, [2, 1, 1]);
		assert!(d.source.contains("@workgroup_size(64, 1, 1)"));
		assert!(d.source.contains("i < 4;"));
		assert_ne!(d.shader_key, program(&[300], ops::neg()).descriptor().shader_key);
	}
}
