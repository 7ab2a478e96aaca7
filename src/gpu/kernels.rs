//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

pub mod cast;
pub mod resize_bilinear;
pub mod unary_op;

pub use cast::{cast, float16};
pub use resize_bilinear::{ResizeBilinearProgram, resize_bilinear, resize_bilinear_with_precision};
pub use unary_op::{UnaryOpProgram, unary};

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use half::f16;
	use naga::front::wgsl;

	use super::*;
	use crate::gpu::shader::{ScalarFn, ops};
	use crate::tensor::{DType, HasDType, Shape};

	fn validate_wgsl(source: &str) -> Result<(), String> {
		let module = wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
		let mut validator = naga::valid::Validator::new(
			naga::valid::ValidationFlags::all(),
			naga::valid::Capabilities::all(),
		);
		validator.validate(&module).map_err(|e| format!("{e:?}"))?;
		Ok(())
	}

	fn assert_valid(what: &str, source: &str) {
		if let Err(e) = validate_wgsl(source) {
			panic!("{what}: {e}\n{source}");
		}
	}

	const SHAPES: [&[usize]; 6] = [&[256], &[300], &[3, 100], &[2, 3, 5, 7], &[], &[3, 5, 7]];

	fn float_ops() -> Vec<ScalarFn> {
		vec![
			ops::linear(),
			ops::relu(),
			ops::relu6(),
			ops::elu(),
			ops::sigmoid(),
			ops::abs(),
			ops::square(),
			ops::neg(),
			ops::tanh(),
			ops::exp(),
			ops::log(),
			ops::to_float16(),
			ops::round_to(f32::dtype),
		]
	}

	#[test]
	fn test_unary_sources_are_valid_wgsl() {
		let pairs = [
			(f32::dtype, f32::dtype),
			(f16::dtype, f16::dtype),
			(f32::dtype, f16::dtype),
			(f16::dtype, f32::dtype),
		];
		for op in float_ops() {
			for &(input, output) in &pairs {
				for &dims in &SHAPES {
					let shape = Shape::new(dims);
					let d = UnaryOpProgram::new(&shape, op.clone(), input, output).descriptor();
					let what = format!("{} {shape} {input}->{output}", op.name());
					assert_valid(&what, &d.source);
				}
			}
		}
	}

	#[test]
	fn test_cast_sources_are_valid_wgsl() {
		let dtypes: [DType; 4] = [f32::dtype, f16::dtype, i32::dtype, u32::dtype];
		for &input in &dtypes {
			for &output in &dtypes {
				for &dims in &SHAPES {
					let shape = Shape::new(dims);
					let d = UnaryOpProgram::new(&shape, ops::round_to(output), input, output)
						.descriptor();
					assert_valid(&format!("cast {shape} {input}->{output}"), &d.source);
				}
			}
		}
	}

	#[test]
	fn test_resize_sources_are_valid_wgsl() {
		let pairs = [
			(f32::dtype, f32::dtype),
			(f16::dtype, f16::dtype),
			(f16::dtype, f32::dtype),
			(f32::dtype, f16::dtype),
		];
		let sizes = [([1, 4, 6, 2], 8, 12), ([2, 5, 5, 3], 2, 3), ([1, 3, 3, 1], 1, 1)];
		for &(dtype, precision) in &pairs {
			for &(input, h, w) in &sizes {
				for align_corners in [false, true] {
					let d = ResizeBilinearProgram::new(input, h, w, align_corners, dtype, precision)
						.descriptor();
					let what = format!(
						"resize {input:?} -> {h}x{w} align_corners={align_corners} {dtype}/{precision}"
					);
					assert_valid(&what, &d.source);
				}
			}
		}
	}
}
