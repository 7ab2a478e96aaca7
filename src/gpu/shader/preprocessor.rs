//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Pieces of WGSL shared by the programs: bindings, shape uniforms and the
//! helpers that translate between flat indices and output coordinates.
//!
//! Binding layout of every program:
//! - `@binding(0)` is the output buffer `result`,
//! - `@binding(1..=n)` are the inputs, in the order of `variable_names`,
//! - `@binding(n + 1)` is the `uniforms` block, if the program declares one.

use smallvec::SmallVec;

use crate::gpu::dispatch::DispatchLayout;
use crate::gpu::shader::writer::SourceWriter;
use crate::tensor::shape::INLINE_DIMS;
use crate::tensor::{DType, DTypeId, MAX_RANK};

//--------------------------------------------------------------------------------------------------

const AXIS_NAMES: [&str; 3] = ["x", "y", "z"];

/// WGSL type of output coordinates for a tensor of rank `rank`.
///
/// Ranks 0 and 1 both address the output with a single `i32`.
pub fn coords_type(rank: usize) -> &'static str {
	assert!(rank <= MAX_RANK);
	match rank {
		0 | 1 => "i32",
		2 => "vec2<i32>",
		3 => "vec3<i32>",
		_ => "vec4<i32>",
	}
}

pub fn wgsl_type(dtype: DType) -> &'static str {
	dtype.wgsl_type().unwrap_or("f32")
}

/// Name of the accessor generated for input `var`, e.g. `A` -> `getA`.
fn getter_name(var: &str) -> String {
	let mut chars = var.chars();
	match chars.next() {
		Some(first) => format!("get{}{}", first.to_ascii_uppercase(), chars.as_str()),
		None => "get".to_string(),
	}
}

//--------------------------------------------------------------------------------------------------

/// Emits `enable f16;` when any of `dtypes` needs it.
pub fn enable_extensions(w: &mut SourceWriter, dtypes: &[DType]) {
	let f16 = dtypes.iter().any(|dtype| dtype.id() == DTypeId::F16);
	w.param("f16", f16);
	if f16 {
		w.line("enable f16;");
		w.line("");
	}
}

/// Declares the output buffer and the input buffers.
///
/// Returns the next free binding index.
pub fn storage_bindings(w: &mut SourceWriter, output: DType, inputs: &[(&str, DType)]) -> u32 {
	let ty = w.lit(wgsl_type(output));
	w.line(&format!("@group(0) @binding(0) var<storage, read_write> result: array<{ty}>;"));
	let mut binding = 1;
	for &(name, dtype) in inputs {
		let index = w.lit(binding);
		let name = w.lit(name);
		let ty = w.lit(wgsl_type(dtype));
		w.line(&format!("@group(0) @binding({index}) var<storage, read> {name}: array<{ty}>;"));
		binding += 1;
	}
	w.line("");
	binding
}

//--------------------------------------------------------------------------------------------------

/// Host side values of the `uniforms` block declared by `shape_uniforms_decl()`.
///
/// The execution engine fills the block from the program's output shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapeUniforms {
	/// Output extents. Rank 0 is treated as `[1]`.
	pub out_shape: SmallVec<[i32; INLINE_DIMS]>,

	/// Row-major strides of all but the innermost dimension.
	pub out_shape_strides: SmallVec<[i32; INLINE_DIMS]>,
}

impl ShapeUniforms {
	pub fn new(shape: &[usize]) -> Self {
		if shape.is_empty() {
			return Self {
				out_shape: SmallVec::from_slice(&[1]),
				out_shape_strides: SmallVec::new(),
			};
		}
		let out_shape: SmallVec<[i32; INLINE_DIMS]> =
			shape.iter().map(|&dim| dim as i32).collect();
		let mut out_shape_strides: SmallVec<[i32; INLINE_DIMS]> = SmallVec::new();
		let mut acc = 1_i32;
		for &dim in out_shape.iter().skip(1).rev() {
			acc *= dim;
			out_shape_strides.push(acc);
		}
		out_shape_strides.reverse();
		Self { out_shape, out_shape_strides }
	}

	/// Mirrors the generated `getCoordsFromFlatIndex()`.
	pub fn coords_from_flat_index(&self, index: i32) -> SmallVec<[i32; INLINE_DIMS]> {
		let mut coords: SmallVec<[i32; INLINE_DIMS]> = SmallVec::new();
		let mut rem = index;
		for &stride in &self.out_shape_strides {
			let d = rem / stride;
			rem -= d * stride;
			coords.push(d);
		}
		coords.push(rem);
		coords
	}

	/// Mirrors the generated `get{Var}AtOutCoords()` index computation.
	pub fn flat_index(&self, coords: &[i32]) -> i32 {
		let (last, outer) = coords.split_last().map_or((0, &[][..]), |(l, o)| (*l, o));
		outer.iter().zip(self.out_shape_strides.iter()).map(|(c, s)| c * s).sum::<i32>() + last
	}
}

fn stride_ref(rank: usize, i: usize) -> String {
	if rank == 2 {
		"uniforms.outShapeStrides".to_string()
	} else {
		format!("uniforms.outShapeStrides[{i}]")
	}
}

/// Declares `struct Uniforms { outShape, outShapeStrides }` at `binding`.
pub fn shape_uniforms_decl(w: &mut SourceWriter, rank: usize, binding: u32) {
	let rank = rank.max(1);
	w.param("rank", rank);
	let coords = w.lit(coords_type(rank));
	w.open("struct Uniforms {");
	w.line(&format!("outShape: {coords},"));
	if rank > 1 {
		let strides = w.lit(coords_type(rank - 1));
		w.line(&format!("outShapeStrides: {strides},"));
	}
	w.close("};");
	let binding = w.lit(binding);
	w.line(&format!("@group(0) @binding({binding}) var<uniform> uniforms: Uniforms;"));
	w.line("");
}

/// Emits `getCoordsFromFlatIndex(index: i32) -> coords`, using the shape uniforms.
pub fn coords_from_flat_index_fn(w: &mut SourceWriter, rank: usize) {
	let rank = rank.max(1);
	w.param("rank", rank);
	let coords = w.lit(coords_type(rank));
	w.open(&format!("fn getCoordsFromFlatIndex(index: i32) -> {coords} {{"));
	if rank == 1 {
		w.line("return index;");
	} else {
		w.line("var rem = index;");
		let mut names = Vec::with_capacity(rank);
		for i in 0..rank - 1 {
			let stride = stride_ref(rank, i);
			w.line(&format!("let d{i} = rem / {stride};"));
			w.line(&format!("rem = rem - d{i} * {stride};"));
			names.push(format!("d{i}"));
		}
		names.push("rem".to_string());
		w.line(&format!("return {coords}({});", names.join(", ")));
	}
	w.close("}");
	w.line("");
}

/// Emits `get{Var}AtOutCoords(coords) -> T` for an input with the output's shape.
pub fn get_at_out_coords_fn(w: &mut SourceWriter, var: &str, dtype: DType, rank: usize) {
	let rank = rank.max(1);
	w.param("rank", rank);
	let var = w.lit(var);
	let getter = getter_name(&var);
	let coords = w.lit(coords_type(rank));
	let ty = w.lit(wgsl_type(dtype));
	w.open(&format!("fn {getter}AtOutCoords(coords: {coords}) -> {ty} {{"));
	if rank == 1 {
		w.line(&format!("return {var}[coords];"));
	} else {
		let mut terms: Vec<String> =
			(0..rank - 1).map(|i| format!("coords[{i}] * {}", stride_ref(rank, i))).collect();
		terms.push(format!("coords[{}]", rank - 1));
		w.line(&format!("return {var}[{}];", terms.join(" + ")));
	}
	w.close("}");
	w.line("");
}

/// Emits `setOutput(flatIndex: i32, value: T)` converting to the output dtype.
pub fn set_output_flat_fn(w: &mut SourceWriter, value: DType, output: DType) {
	let value_ty = w.lit(wgsl_type(value));
	let output_ty = w.lit(wgsl_type(output));
	w.open(&format!("fn setOutput(flatIndex: i32, value: {value_ty}) {{"));
	w.line(&format!("result[flatIndex] = {output_ty}(value);"));
	w.close("}");
	w.line("");
}

//--------------------------------------------------------------------------------------------------
// Helpers with the shape baked into the source as literals.

/// Emits `getOutputCoords(globalId: vec3<u32>) -> coords` for `layout`.
///
/// Matches `DispatchLayout::invocation_coords()`.
pub fn output_coords_fn(w: &mut SourceWriter, layout: &DispatchLayout, shape: &[usize]) {
	let rank = shape.len().max(1);
	let coords = w.lit(coords_type(rank));
	w.open(&format!("fn getOutputCoords(globalId: vec3<u32>) -> {coords} {{"));
	for (axis, dims) in layout.axes().into_iter().enumerate() {
		let axis_name = AXIS_NAMES[axis];
		w.param(axis_name, format!("{dims:?}").replace(' ', ""));
		if dims.is_empty() {
			continue;
		}
		w.line(&format!("var {axis_name} = i32(globalId.{axis_name});"));
		for (i, &dim) in dims.iter().enumerate() {
			let d = w.lit(dim);
			if i + 1 < dims.len() {
				let stride: usize = dims[i + 1..].iter().map(|&d| shape[d]).product();
				let stride = w.lit(stride);
				w.line(&format!("let d{d} = {axis_name} / {stride};"));
				w.line(&format!("{axis_name} = {axis_name} - d{d} * {stride};"));
			} else {
				w.line(&format!("let d{d} = {axis_name};"));
			}
		}
	}
	if shape.len() <= 1 {
		w.line("return d0;");
	} else {
		let names: Vec<String> = (0..shape.len()).map(|i| format!("d{i}")).collect();
		w.line(&format!("return {coords}({});", names.join(", ")));
	}
	w.close("}");
	w.line("");
}

/// Emits a literal `vecN<i32>(...)` holding `shape`, for bounds checks.
pub fn shape_literal(w: &mut SourceWriter, shape: &[usize]) -> String {
	let dims: Vec<String> = shape.iter().map(|&dim| w.lit(dim)).collect();
	if shape.len() <= 1 {
		format!("i32({})", dims.first().map_or("1", String::as_str))
	} else {
		format!("{}({})", coords_type(shape.len()), dims.join(", "))
	}
}

fn index_expr(w: &mut SourceWriter, shape: &[usize]) -> String {
	let mut strides = vec![1_usize; shape.len()];
	let mut acc = 1;
	for (stride, &dim) in strides.iter_mut().zip(shape.iter()).rev() {
		*stride = acc;
		acc *= dim;
	}
	let terms: Vec<String> = strides
		.iter()
		.enumerate()
		.map(|(i, &stride)| {
			if i + 1 == shape.len() {
				format!("d{i}")
			} else {
				let stride = w.lit(stride);
				format!("d{i} * {stride}")
			}
		})
		.collect();
	terms.join(" + ")
}

fn coord_params(rank: usize) -> String {
	(0..rank).map(|i| format!("d{i}: i32")).collect::<Vec<_>>().join(", ")
}

/// Emits `get{Var}(d0, .., dN) -> T` reading an input of shape `shape`.
pub fn get_at_coords_fn(w: &mut SourceWriter, var: &str, dtype: DType, shape: &[usize]) {
	let var = w.lit(var);
	let getter = getter_name(&var);
	let ty = w.lit(wgsl_type(dtype));
	w.param("rank", shape.len());
	let params = coord_params(shape.len());
	w.open(&format!("fn {getter}({params}) -> {ty} {{"));
	let index = index_expr(w, shape);
	w.line(&format!("return {var}[{index}];"));
	w.close("}");
	w.line("");
}

/// Emits `setOutput(d0, .., dN, value: T)` writing an output of shape `shape`.
pub fn set_output_coords_fn(w: &mut SourceWriter, value: DType, output: DType, shape: &[usize]) {
	let value_ty = w.lit(wgsl_type(value));
	let output_ty = w.lit(wgsl_type(output));
	w.param("rank", shape.len());
	let params = coord_params(shape.len());
	w.open(&format!("fn setOutput({params}, value: {value_ty}) {{"));
	let index = index_expr(w, shape);
	w.line(&format!("result[{index}] = {output_ty}(value);"));
	w.close("}");
	w.line("");
}

//--------------------------------------------------------------------------------------------------
