//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use smallvec::smallvec;

use crate::ErrPack;
use crate::gpu::backend::{Backend, ExecutorError, check_shader_dtype};
use crate::gpu::config::KernelConfig;
use crate::gpu::dispatch::{DispatchLayout, WorkGroupSize, compute_dispatch};
use crate::gpu::program::{ProgramDescriptor, ProgramKind};
use crate::gpu::shader::SourceWriter;
use crate::gpu::shader::preprocessor::{self, wgsl_type};
use crate::tensor::{DType, Shape, TensorInfo};

//--------------------------------------------------------------------------------------------------

const INPUT: &str = "x";

/// Bilinear resize of a `[batch, height, width, channels]` tensor.
///
/// Every extent and flag is baked into the source, so each combination of
/// shapes compiles to its own program.
///
/// The output is indexed as `x: width`, `y: height`, `z: batch * channels`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResizeBilinearProgram {
	pub input_shape: [usize; 4],
	pub new_height: usize,
	pub new_width: usize,
	pub align_corners: bool,

	/// Dtype of the input and output buffers.
	pub dtype: DType,

	/// Interpolation arithmetic runs in this precision.
	pub precision: DType,

	pub workgroup_size: WorkGroupSize,
}

/// Source position of one output pixel, as computed by the generated shader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceCoords {
	/// `[row, col]` of the top left neighbour.
	pub floor: [usize; 2],

	/// `[row, col]` of the bottom right neighbour, clamped to the last input index.
	pub ceil: [usize; 2],

	/// Blend weights of the bottom row and the right column.
	pub frac: [f32; 2],
}

impl ResizeBilinearProgram {
	pub fn new(
		input_shape: [usize; 4],
		new_height: usize,
		new_width: usize,
		align_corners: bool,
		dtype: DType,
		precision: DType,
	) -> Self {
		Self::with_config(
			input_shape,
			new_height,
			new_width,
			align_corners,
			dtype,
			precision,
			&KernelConfig::DEFAULT,
		)
	}

	#[allow(clippy::too_many_arguments)]
	pub fn with_config(
		input_shape: [usize; 4],
		new_height: usize,
		new_width: usize,
		align_corners: bool,
		dtype: DType,
		precision: DType,
		config: &KernelConfig,
	) -> Self {
		assert!(input_shape[1] > 0 && input_shape[2] > 0);
		Self {
			input_shape,
			new_height,
			new_width,
			align_corners,
			dtype,
			precision,
			workgroup_size: config.resize_workgroup,
		}
	}

	pub fn output_shape(&self) -> [usize; 4] {
		let [batch, _, _, channels] = self.input_shape;
		[batch, self.new_height, self.new_width, channels]
	}

	pub fn adjust_height(&self) -> bool {
		self.align_corners && self.new_height > 1
	}

	pub fn adjust_width(&self) -> bool {
		self.align_corners && self.new_width > 1
	}

	/// `[height, width]` of the input used for the scale ratio.
	pub fn effective_in_size(&self) -> [f32; 2] {
		let [_, in_h, in_w, _] = self.input_shape;
		[
			(if self.adjust_height() { in_h - 1 } else { in_h }) as f32,
			(if self.adjust_width() { in_w - 1 } else { in_w }) as f32,
		]
	}

	/// `[height, width]` of the output used for the scale ratio.
	pub fn effective_out_size(&self) -> [f32; 2] {
		[
			(if self.adjust_height() { self.new_height - 1 } else { self.new_height }) as f32,
			(if self.adjust_width() { self.new_width - 1 } else { self.new_width }) as f32,
		]
	}

	/// Largest valid `[row, col]` of the input.
	pub fn max_source_index(&self) -> [f32; 2] {
		let [_, in_h, in_w, _] = self.input_shape;
		[(in_h - 1) as f32, (in_w - 1) as f32]
	}

	pub fn dispatch_layout() -> DispatchLayout {
		DispatchLayout::new(&[2], &[1], &[0, 3])
	}

	/// Computes the same neighbours and weights as the generated shader.
	pub fn source_coords(&self, row: usize, col: usize) -> SourceCoords {
		let eff_in = self.effective_in_size();
		let eff_out = self.effective_out_size();
		let max = self.max_source_index();
		let rc = [row as f32, col as f32];
		let frac_index: [f32; 2] = std::array::from_fn(|i| (rc[i] * eff_in[i]) / eff_out[i]);
		let floor = frac_index.map(|v| v as i32);
		let ceil: [i32; 2] = std::array::from_fn(|i| max[i].min(frac_index[i].ceil()) as i32);
		SourceCoords {
			floor: floor.map(|v| v as usize),
			ceil: ceil.map(|v| v as usize),
			frac: std::array::from_fn(|i| frac_index[i] - floor[i] as f32),
		}
	}

	pub fn descriptor(&self) -> ProgramDescriptor {
		let layout = Self::dispatch_layout();
		let output_shape = self.output_shape();
		let dispatch = compute_dispatch(&layout, &output_shape, self.workgroup_size, [1, 1, 1]);
		let (source, shader_key) = self.generate_source(&layout);
		log::debug!(
			"resize_bilinear: {:?} -> {output_shape:?} align_corners={} {}/{} dispatch={dispatch:?}",
			self.input_shape,
			self.align_corners,
			self.dtype,
			self.precision,
		);
		log::trace!("resize_bilinear source:\n{source}");
		ProgramDescriptor {
			output_shape: Shape::new(&output_shape),
			output_dtype: self.dtype,
			shader_key,
			source,
			variable_names: smallvec![INPUT],
			dispatch_layout: layout,
			dispatch,
			workgroup_size: self.workgroup_size,
			uniforms: None,
			kind: ProgramKind::ResizeBilinear(self.clone()),
		}
	}

	fn generate_source(&self, layout: &DispatchLayout) -> (String, String) {
		let output_shape = self.output_shape();

		let mut w = SourceWriter::new("resize_bilinear");
		preprocessor::enable_extensions(&mut w, &[self.dtype, self.precision]);
		preprocessor::storage_bindings(&mut w, self.dtype, &[(INPUT, self.dtype)]);
		preprocessor::output_coords_fn(&mut w, layout, &output_shape);
		preprocessor::get_at_coords_fn(&mut w, INPUT, self.dtype, &self.input_shape);
		preprocessor::set_output_coords_fn(&mut w, self.precision, self.dtype, &output_shape);

		w.param("adjust_height", self.adjust_height());
		w.param("adjust_width", self.adjust_width());
		let t = w.lit(wgsl_type(self.precision));
		let [in_h, in_w] = self.effective_in_size().map(|v| w.lit_f32(v));
		let [out_h, out_w] = self.effective_out_size().map(|v| w.lit_f32(v));
		let [max_r, max_c] = self.max_source_index().map(|v| w.lit_f32(v));
		let bounds = preprocessor::shape_literal(&mut w, &output_shape);
		let [x, y, z] = self.workgroup_size.map(|size| w.lit(size));

		w.line(&format!("@compute @workgroup_size({x}, {y}, {z})"));
		w.open("fn main(@builtin(global_invocation_id) globalId: vec3<u32>) {");
		w.line("let coords = getOutputCoords(globalId);");
		w.open(&format!("if (all(coords < {bounds})) {{"));
		w.line("let b = coords[0];");
		w.line("let d = coords[3];");
		w.line("let rc = coords.yz;");
		w.line(&format!("let effectiveInSize = vec2<f32>({in_h}, {in_w});"));
		w.line(&format!("let effectiveOutSize = vec2<f32>({out_h}, {out_w});"));
		w.line("let sourceFracIndexRC = (vec2<f32>(rc) * effectiveInSize) / effectiveOutSize;");
		w.line("let sourceFloorRC = vec2<i32>(sourceFracIndexRC);");
		w.line(&format!(
			"let sourceCeilRC = vec2<i32>(min(vec2<f32>({max_r}, {max_c}), ceil(sourceFracIndexRC)));"
		));
		w.line(&format!("let topLeft = {t}(getX(b, sourceFloorRC.x, sourceFloorRC.y, d));"));
		w.line(&format!("let bottomLeft = {t}(getX(b, sourceCeilRC.x, sourceFloorRC.y, d));"));
		w.line(&format!("let topRight = {t}(getX(b, sourceFloorRC.x, sourceCeilRC.y, d));"));
		w.line(&format!("let bottomRight = {t}(getX(b, sourceCeilRC.x, sourceCeilRC.y, d));"));
		w.line("let fracRC = sourceFracIndexRC - vec2<f32>(sourceFloorRC);");
		w.line(&format!("let top = topLeft + (topRight - topLeft) * {t}(fracRC.y);"));
		w.line(&format!("let bottom = bottomLeft + (bottomRight - bottomLeft) * {t}(fracRC.y);"));
		w.line(&format!("let newValue = top + (bottom - top) * {t}(fracRC.x);"));
		w.line("setOutput(b, coords[1], coords[2], d, newValue);");
		w.close("}");
		w.close("}");
		w.finish()
	}
}

//--------------------------------------------------------------------------------------------------

/// Resizes a `[batch, height, width, channels]` tensor to `new_height` x `new_width`.
///
/// Interpolates in the input's precision.
pub fn resize_bilinear<B: Backend + ?Sized>(
	input: &TensorInfo,
	new_height: usize,
	new_width: usize,
	align_corners: bool,
	backend: &B,
) -> Result<TensorInfo, ErrPack<ExecutorError>> {
	resize_bilinear_with_precision(input, new_height, new_width, align_corners, input.dtype, backend)
}

pub fn resize_bilinear_with_precision<B: Backend + ?Sized>(
	input: &TensorInfo,
	new_height: usize,
	new_width: usize,
	align_corners: bool,
	precision: DType,
	backend: &B,
) -> Result<TensorInfo, ErrPack<ExecutorError>> {
	check_shader_dtype(input.dtype)?;
	check_shader_dtype(precision)?;
	if !precision.is_float() {
		return Err(ExecutorError::unsupported_dtype(precision));
	}
	let input_shape: [usize; 4] = match input.shape[..] {
		[b, h, w, c] if h > 0 && w > 0 => [b, h, w, c],
		_ => {
			let expected = Shape::new(&[0, 1, 1, 0]);
			return Err(ExecutorError::shape_mismatch(&expected, &input.shape));
		},
	};
	let program = ResizeBilinearProgram::new(
		input_shape,
		new_height,
		new_width,
		align_corners,
		input.dtype,
		precision,
	);
	let descriptor = program.descriptor();
	let output = backend.make_output(&descriptor.output_shape, input.dtype)?;
	backend.compile_and_run(&descriptor, &[input], output)
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use half::f16;

	use super::*;
	use crate::tensor::HasDType;

	fn program(input: [usize; 4], h: usize, w: usize, align: bool) -> ResizeBilinearProgram {
		ResizeBilinearProgram::new(input, h, w, align, f16::dtype, f16::dtype)
	}

	#[test]
	fn test_effective_sizes() {
		let p = program([1, 4, 6, 2], 8, 12, true);
		assert!(p.adjust_height() && p.adjust_width());
		assert_eq!(p.effective_in_size(), [3.0, 5.0]);
		assert_eq!(p.effective_out_size(), [7.0, 11.0]);

		let p = program([1, 4, 6, 2], 1, 12, true);
		assert!(!p.adjust_height());
		assert!(p.adjust_width());
		assert_eq!(p.effective_in_size(), [4.0, 5.0]);
		assert_eq!(p.effective_out_size(), [1.0, 11.0]);

		let p = program([1, 4, 6, 2], 8, 12, false);
		assert_eq!(p.effective_in_size(), [4.0, 6.0]);
		assert_eq!(p.effective_out_size(), [8.0, 12.0]);
	}

	#[test]
	fn test_align_corners_hits_corners() {
		for (in_h, in_w, h, w) in [(4, 6, 8, 12), (3, 7, 5, 2), (10, 10, 3, 3), (2, 9, 17, 31)] {
			let p = program([1, in_h, in_w, 1], h, w, true);
			let first = p.source_coords(0, 0);
			assert_eq!(first.floor, [0, 0]);
			assert_eq!(first.frac, [0.0, 0.0]);
			let last = p.source_coords(h - 1, w - 1);
			assert_eq!(last.floor, [in_h - 1, in_w - 1]);
			assert_eq!(last.ceil, [in_h - 1, in_w - 1]);
			assert_eq!(last.frac, [0.0, 0.0]);
		}
	}

	#[test]
	fn test_ceil_is_clamped() {
		for align in [false, true] {
			for (in_h, in_w, h, w) in [(4, 6, 8, 12), (5, 3, 2, 9), (1, 1, 4, 4), (7, 2, 7, 2)] {
				let p = program([2, in_h, in_w, 3], h, w, align);
				for r in 0..h {
					for c in 0..w {
						let s = p.source_coords(r, c);
						assert!(s.ceil[0] < in_h && s.ceil[1] < in_w);
						assert!(s.floor[0] <= s.ceil[0] && s.floor[1] <= s.ceil[1]);
						assert!(s.frac.iter().all(|&f| (0.0..1.0).contains(&f)));
					}
				}
			}
		}
	}

	#[test]
	fn test_source() {
		let d = program([1, 4, 6, 2], 8, 12, true).descriptor();
		assert_eq!(d.output_shape, Shape::new(&[1, 8, 12, 2]));
		assert_eq!(d.dispatch, [3, 2, 1]);
		assert_eq!(d.workgroup_size, [4, 4, 4]);
		assert!(d.uniforms.is_none());
		assert!(d.source.starts_with("enable f16;\n"));
		assert!(d.source.contains("\tif (all(coords < vec4<i32>(1, 8, 12, 2))) {\n"));
		assert!(d.source.contains("let effectiveInSize = vec2<f32>(3.0, 5.0);"));
		assert!(d.source.contains("let effectiveOutSize = vec2<f32>(7.0, 11.0);"));
		assert!(d.source.contains("min(vec2<f32>(3.0, 5.0), ceil(sourceFracIndexRC))"));
		assert!(d.source.contains("let newValue = top + (bottom - top) * f16(fracRC.x);"));
		assert!(d.source.contains("\treturn x[d0 * 48 + d1 * 12 + d2 * 2 + d3];\n"));
		assert!(d.source.contains("\tresult[d0 * 192 + d1 * 24 + d2 * 2 + d3] = f16(value);\n"));
	}

	#[test]
	fn test_key_includes_every_literal() {
		let descriptors = [
			program([1, 4, 6, 2], 8, 12, true).descriptor(),
			program([1, 4, 6, 2], 8, 12, false).descriptor(),
			program([1, 4, 6, 2], 1, 12, true).descriptor(),
			program([1, 4, 6, 2], 8, 11, true).descriptor(),
			program([2, 4, 6, 2], 8, 12, true).descriptor(),
			program([1, 4, 6, 3], 8, 12, true).descriptor(),
			program([1, 5, 6, 2], 8, 12, true).descriptor(),
			ResizeBilinearProgram::new([1, 4, 6, 2], 8, 12, true, f16::dtype, f32::dtype).descriptor(),
		];
		for (i, x) in descriptors.iter().enumerate() {
			for y in &descriptors[i + 1..] {
				assert_ne!(x.source, y.source);
				assert_ne!(x.shader_key, y.shader_key);
			}
		}
		let again = program([1, 4, 6, 2], 8, 12, true).descriptor();
		assert_eq!(again.shader_key, descriptors[0].shader_key);
		assert_eq!(again.source, descriptors[0].source);
	}
}
