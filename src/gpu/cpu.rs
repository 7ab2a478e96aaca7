//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Host side execution engine.
//!
//! Runs programs by emulating every invocation of the dispatch grid. A program
//! is "compiled" once per shader key, and the compiled form keeps only what the
//! key pins down. Shapes that reach the shader at dispatch time (the shape
//! uniforms) are taken from the descriptor on every run, the same way a device
//! engine binds them.

use std::sync::{Arc, Mutex, PoisonError};

use ndarray::{ArrayD, IxDyn};
use smallvec::SmallVec;

use crate::ErrPack;
use crate::gpu::backend::{AllocationFailedError, Backend, ExecutorError};
use crate::gpu::cache::{CacheStats, ProgramCache};
use crate::gpu::kernels::resize_bilinear::ResizeBilinearProgram;
use crate::gpu::program::{ProgramDescriptor, ProgramKind};
use crate::gpu::shader::ScalarFn;
use crate::gpu::shader::preprocessor::ShapeUniforms;
use crate::tensor::{BufferId, DType, Shape, TensorInfo};

//--------------------------------------------------------------------------------------------------

struct CpuBuffer {
	shape: Shape,
	dtype: DType,
	bytes: Vec<u8>,
}

impl CpuBuffer {
	fn values(&self) -> Vec<f64> {
		self.bytes.chunks_exact(self.dtype.bytes()).map(|b| self.dtype.decode(b)).collect()
	}

	fn to_array(&self) -> Result<ArrayD<f64>, ErrPack<ExecutorError>> {
		ArrayD::from_shape_vec(IxDyn(&self.shape), self.values()).map_err(|e| {
			ErrPack::with_message(ExecutorError::InvalidBuffer, format!("buffer shape: {e}"))
		})
	}
}

/// Shape independent parts of a unary program.
struct CompiledUnary {
	fit: bool,
	work_per_thread: u32,

	/// Baked into the no-fit branch only.
	size: usize,
	uses_shape_uniforms: bool,
	op: ScalarFn,
	working: DType,
}

enum CompiledProgram {
	Unary(CompiledUnary),

	/// Everything about a resize is baked into its source.
	ResizeBilinear(ResizeBilinearProgram),
}

impl CompiledProgram {
	fn new(kind: &ProgramKind) -> Self {
		match kind {
			ProgramKind::UnaryOp(p) => Self::Unary(CompiledUnary {
				fit: p.fit,
				work_per_thread: p.work_per_thread,
				size: p.size(),
				uses_shape_uniforms: p.uses_shape_uniforms(),
				op: p.op.clone(),
				working: p.input_dtype,
			}),
			ProgramKind::ResizeBilinear(p) => Self::ResizeBilinear(p.clone()),
		}
	}
}

/// Statistics of the most recent `compile_and_run()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunTrace {
	pub invocations: usize,

	/// Number of writes to each element of the output, by flat index.
	pub write_counts: Vec<u32>,
}

struct OutputWriter<'a> {
	dtype: DType,
	bytes: &'a mut [u8],
	write_counts: Vec<u32>,
}

impl OutputWriter<'_> {
	fn set(&mut self, index: i64, value: f64) -> Result<(), ErrPack<ExecutorError>> {
		let Some(i) = usize::try_from(index).ok().filter(|&i| i < self.write_counts.len()) else {
			return Err(out_of_bounds("result", index));
		};
		let size = self.dtype.bytes();
		self.dtype.encode(value, &mut self.bytes[i * size..(i + 1) * size]);
		self.write_counts[i] += 1;
		Ok(())
	}
}

#[cold]
#[inline(never)]
fn out_of_bounds(var: &str, index: i64) -> ErrPack<ExecutorError> {
	ErrPack::with_message(ExecutorError::OutOfBounds, format!("{var}[{index}] is out of bounds"))
}

#[cold]
#[inline(never)]
fn invalid_buffer(buffer: BufferId) -> ErrPack<ExecutorError> {
	ErrPack::with_message(ExecutorError::InvalidBuffer, format!("unknown buffer {buffer:?}"))
}

fn read_flat(var: &str, values: &[f64], index: i64) -> Result<f64, ErrPack<ExecutorError>> {
	usize::try_from(index)
		.ok()
		.and_then(|i| values.get(i).copied())
		.ok_or_else(|| out_of_bounds(var, index))
}

/// Global ids of all invocations launched by `program`.
fn global_ids(program: &ProgramDescriptor) -> impl Iterator<Item = [u32; 3]> {
	let [x, y, z]: [u32; 3] =
		std::array::from_fn(|i| program.dispatch[i].saturating_mul(program.workgroup_size[i]));
	(0..z).flat_map(move |gz| (0..y).flat_map(move |gy| (0..x).map(move |gx| [gx, gy, gz])))
}

//--------------------------------------------------------------------------------------------------

/// Reference execution engine. Buffers live in host memory.
pub struct CpuBackend {
	buffers: Mutex<Vec<CpuBuffer>>,
	cache: ProgramCache<CompiledProgram>,
	last_run: Mutex<RunTrace>,
}

impl Default for CpuBackend {
	fn default() -> Self {
		Self::new()
	}
}

impl CpuBackend {
	pub fn new() -> Self {
		Self {
			buffers: Mutex::new(Vec::new()),
			cache: ProgramCache::new(),
			last_run: Mutex::new(RunTrace::default()),
		}
	}

	fn alloc(&self, shape: &Shape, dtype: DType, bytes: Vec<u8>) -> TensorInfo {
		let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
		let buffer = BufferId(buffers.len());
		buffers.push(CpuBuffer { shape: shape.clone(), dtype, bytes });
		TensorInfo { shape: shape.clone(), dtype, buffer }
	}

	/// Creates a tensor holding `values`, rounded to `dtype`.
	pub fn upload(
		&self,
		shape: &Shape,
		dtype: DType,
		values: &[f64],
	) -> Result<TensorInfo, ErrPack<ExecutorError>> {
		if values.len() != shape.elems() {
			return Err(ErrPack::with_message(
				ExecutorError::ShapeMismatch,
				format!("{} values for shape {shape}", values.len()),
			));
		}
		let size = dtype.bytes();
		let mut bytes = vec![0; dtype.array_bytes(values.len()).ok_or(AllocationFailedError)?];
		for (dst, &value) in bytes.chunks_exact_mut(size).zip(values) {
			dtype.encode(value, dst);
		}
		Ok(self.alloc(shape, dtype, bytes))
	}

	pub fn download(&self, tensor: &TensorInfo) -> Result<Vec<f64>, ErrPack<ExecutorError>> {
		let buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
		let buffer = buffers.get(tensor.buffer.0).ok_or_else(|| invalid_buffer(tensor.buffer))?;
		Ok(buffer.values())
	}

	pub fn read_bytes(&self, tensor: &TensorInfo) -> Result<Vec<u8>, ErrPack<ExecutorError>> {
		let buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
		let buffer = buffers.get(tensor.buffer.0).ok_or_else(|| invalid_buffer(tensor.buffer))?;
		Ok(buffer.bytes.clone())
	}

	pub fn cache_stats(&self) -> CacheStats {
		self.cache.stats()
	}

	pub fn last_run(&self) -> RunTrace {
		self.last_run.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	fn validate(
		buffers: &[CpuBuffer],
		program: &ProgramDescriptor,
		inputs: &[&TensorInfo],
		output: &TensorInfo,
	) -> Result<(), ErrPack<ExecutorError>> {
		if inputs.len() != program.variable_names.len() {
			return Err(ExecutorError::input_count_mismatch(
				program.variable_names.len(),
				inputs.len(),
			));
		}
		let dtypes = program.kind.input_dtypes();
		let shapes = program.kind.input_shapes();
		for ((input, &dtype), shape) in inputs.iter().zip(dtypes.iter()).zip(shapes.iter()) {
			let buffer = buffers.get(input.buffer.0).ok_or_else(|| invalid_buffer(input.buffer))?;
			if buffer.dtype != dtype {
				return Err(ExecutorError::dtype_mismatch(dtype, buffer.dtype));
			}
			if buffer.shape != *shape {
				return Err(ExecutorError::shape_mismatch(shape, &buffer.shape));
			}
		}
		let buffer = buffers.get(output.buffer.0).ok_or_else(|| invalid_buffer(output.buffer))?;
		if buffer.dtype != program.output_dtype {
			return Err(ExecutorError::dtype_mismatch(program.output_dtype, buffer.dtype));
		}
		if buffer.shape != program.output_shape {
			return Err(ExecutorError::shape_mismatch(&program.output_shape, &buffer.shape));
		}
		Ok(())
	}

	fn run_unary(
		compiled: &CompiledUnary,
		program: &ProgramDescriptor,
		input: &ArrayD<f64>,
		out: &mut OutputWriter<'_>,
	) -> Result<usize, ErrPack<ExecutorError>> {
		let values = input.as_slice().ok_or_else(|| {
			ErrPack::with_message(ExecutorError::InvalidBuffer, "input is not contiguous")
		})?;
		let uniforms: Option<&ShapeUniforms> = if compiled.uses_shape_uniforms {
			let uniforms = program.uniforms.as_ref().ok_or_else(|| {
				ErrPack::with_message(ExecutorError::InvalidBuffer, "uniform block is not bound")
			})?;
			Some(uniforms)
		} else {
			None
		};
		let work = i64::from(compiled.work_per_thread);
		let size = compiled.size as i64;
		let mut invocations = 0;
		for global_id in global_ids(program) {
			invocations += 1;
			let index = i64::from(global_id[0]);
			if compiled.fit {
				let a = read_flat("A", values, index)?;
				out.set(index, compiled.op.eval(compiled.working, a))?;
				continue;
			}
			for i in 0..work {
				let flat_index = index * work + i;
				if flat_index < size {
					let a = match uniforms {
						Some(u) => {
							let coords = u.coords_from_flat_index(flat_index as i32);
							read_flat("A", values, i64::from(u.flat_index(&coords)))?
						},
						None => read_flat("A", values, flat_index)?,
					};
					out.set(flat_index, compiled.op.eval(compiled.working, a))?;
				}
			}
		}
		Ok(invocations)
	}

	fn run_resize_bilinear(
		p: &ResizeBilinearProgram,
		program: &ProgramDescriptor,
		input: &ArrayD<f64>,
		out: &mut OutputWriter<'_>,
	) -> Result<usize, ErrPack<ExecutorError>> {
		let output_shape = p.output_shape();
		let out_shape = Shape::new(&output_shape);
		let layout = ResizeBilinearProgram::dispatch_layout();
		let t = p.precision;
		let get = |b: usize, r: usize, c: usize, d: usize| -> Result<f64, ErrPack<ExecutorError>> {
			let value = input.get(IxDyn(&[b, r, c, d])).copied().ok_or_else(|| {
				ErrPack::with_message(
					ExecutorError::OutOfBounds,
					format!("x[{b}, {r}, {c}, {d}] is out of bounds"),
				)
			})?;
			Ok(t.round(value))
		};
		let lerp = |a: f64, b: f64, w: f64| t.round(a + t.round(t.round(b - a) * w));

		let mut invocations = 0;
		for global_id in global_ids(program) {
			invocations += 1;
			let coords = layout.invocation_coords(&output_shape, global_id);
			if coords.iter().zip(output_shape.iter()).any(|(c, dim)| c >= dim) {
				continue;
			}
			let [b, r, c, d] = [coords[0], coords[1], coords[2], coords[3]];
			let s = p.source_coords(r, c);
			let top_left = get(b, s.floor[0], s.floor[1], d)?;
			let bottom_left = get(b, s.ceil[0], s.floor[1], d)?;
			let top_right = get(b, s.floor[0], s.ceil[1], d)?;
			let bottom_right = get(b, s.ceil[0], s.ceil[1], d)?;
			let [frac_r, frac_c] = s.frac.map(|f| t.round(f64::from(f)));
			let top = lerp(top_left, top_right, frac_c);
			let bottom = lerp(bottom_left, bottom_right, frac_c);
			let value = lerp(top, bottom, frac_r);
			out.set(out_shape.flat_index(&coords) as i64, value)?;
		}
		Ok(invocations)
	}
}

impl Backend for CpuBackend {
	fn make_output(&self, shape: &Shape, dtype: DType) -> Result<TensorInfo, ErrPack<ExecutorError>> {
		let bytes = dtype.array_bytes(shape.elems()).ok_or(AllocationFailedError)?;
		Ok(self.alloc(shape, dtype, vec![0; bytes]))
	}

	fn compile_and_run(
		&self,
		program: &ProgramDescriptor,
		inputs: &[&TensorInfo],
		output: TensorInfo,
	) -> Result<TensorInfo, ErrPack<ExecutorError>> {
		let compiled: Arc<_> =
			self.cache.get_or_compile(program, |p| Ok(CompiledProgram::new(&p.kind)))?;

		let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
		Self::validate(&buffers, program, inputs, &output)?;
		let arrays: SmallVec<[ArrayD<f64>; 2]> = inputs
			.iter()
			.map(|input| buffers[input.buffer.0].to_array())
			.collect::<Result<_, _>>()?;

		let out_buffer = &mut buffers[output.buffer.0];
		let mut out = OutputWriter {
			dtype: out_buffer.dtype,
			bytes: &mut out_buffer.bytes,
			write_counts: vec![0; program.output_shape.elems()],
		};
		let invocations = match &compiled.compiled {
			CompiledProgram::Unary(u) => Self::run_unary(u, program, &arrays[0], &mut out)?,
			CompiledProgram::ResizeBilinear(p) => {
				Self::run_resize_bilinear(p, program, &arrays[0], &mut out)?
			},
		};
		log::debug!(
			"ran program #{} ({}): {invocations} invocations",
			compiled.id,
			program.kind.name()
		);

		let trace = RunTrace { invocations, write_counts: out.write_counts };
		*self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = trace;
		Ok(output)
	}
}

//--------------------------------------------------------------------------------------------------
