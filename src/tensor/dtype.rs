//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::num::NonZeroU32;

use half::f16;

//--------------------------------------------------------------------------------------------------

pub trait HasDType {
	const dtype: DType;
}

impl HasDType for f16 {
	const dtype: DType = DType::from_struct(DTypeStruct {
		kind: DTypeKind::Float,
		shift: 4,
		id: DTypeId::F16,
	});
}

impl HasDType for f32 {
	const dtype: DType = DType::from_struct(DTypeStruct {
		kind: DTypeKind::Float,
		shift: 5,
		id: DTypeId::F32,
	});
}

impl HasDType for f64 {
	const dtype: DType = DType::from_struct(DTypeStruct {
		kind: DTypeKind::Float,
		shift: 6,
		id: DTypeId::F64,
	});
}

impl HasDType for i32 {
	const dtype: DType = DType::from_struct(DTypeStruct {
		kind: DTypeKind::Int,
		shift: 5,
		id: DTypeId::I32,
	});
}

impl HasDType for u32 {
	const dtype: DType = DType::from_struct(DTypeStruct {
		kind: DTypeKind::Uint,
		shift: 5,
		id: DTypeId::U32,
	});
}

#[derive(Clone, Copy)]
pub struct DTypeStruct {
	kind: DTypeKind,

	/// Shifting left by this value will convert number of elements to number of bits
	shift: u8,

	id: DTypeId,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(transparent)]
pub struct DType(NonZeroU32);

impl DTypeStruct {
	pub const fn from_dtype(dtype: DType) -> Self {
		let bytes = dtype.0.get().to_le_bytes();
		let id = match DTypeId::from_u8(bytes[2]) {
			Some(id) => id,
			None => DTypeId::F32,
		};
		Self { kind: id.kind(), shift: bytes[1], id }
	}
}

impl DType {
	pub const fn from_struct(data: DTypeStruct) -> Self {
		let val = u32::from_le_bytes([data.kind as u8, data.shift, data.id as u8, 0]);
		match NonZeroU32::new(val) {
			Some(val) => Self(val),
			// DTypeId starts at 1, so val is never 0
			None => unreachable!(),
		}
	}

	pub fn is_float(self) -> bool {
		self.kind() == DTypeKind::Float
	}

	pub fn kind(self) -> DTypeKind {
		DTypeStruct::from_dtype(self).kind
	}

	pub fn id(self) -> DTypeId {
		DTypeStruct::from_dtype(self).id
	}

	pub fn bits(self) -> usize {
		let data = DTypeStruct::from_dtype(self);
		1 << data.shift
	}

	pub fn bytes(self) -> usize {
		self.bits() / 8
	}

	pub fn array_bytes(self, elems: usize) -> Option<usize> {
		elems.checked_mul(self.bytes())
	}

	/// The WGSL scalar type used for buffers and arithmetic of this dtype.
	///
	/// WGSL has no 64-bit types, so `f64` has no shader representation.
	pub fn wgsl_type(self) -> Option<&'static str> {
		match self.id() {
			DTypeId::F16 => Some("f16"),
			DTypeId::F32 => Some("f32"),
			DTypeId::I32 => Some("i32"),
			DTypeId::U32 => Some("u32"),
			DTypeId::F64 => None,
		}
	}

	/// Rounds `value` to the nearest value representable in this dtype,
	/// following the WGSL conversion rules (floats round to nearest even,
	/// float to int conversion truncates toward zero and saturates).
	pub fn round(self, value: f64) -> f64 {
		match self.id() {
			DTypeId::F16 => f16::from_f64(value).to_f64(),
			DTypeId::F32 => f64::from(value as f32),
			DTypeId::F64 => value,
			DTypeId::I32 => {
				if value.is_nan() {
					0.0
				} else {
					value.trunc().clamp(f64::from(i32::MIN), f64::from(i32::MAX))
				}
			},
			DTypeId::U32 => {
				if value.is_nan() {
					0.0
				} else {
					value.trunc().clamp(0.0, f64::from(u32::MAX))
				}
			},
		}
	}

	/// Writes `value` into `dst` using the little-endian encoding of this dtype.
	///
	/// `dst` must be exactly `self.bytes()` long.
	pub fn encode(self, value: f64, dst: &mut [u8]) {
		debug_assert!(dst.len() == self.bytes());
		match self.id() {
			DTypeId::F16 => dst.copy_from_slice(&f16::from_f64(value).to_le_bytes()),
			DTypeId::F32 => dst.copy_from_slice(&(value as f32).to_le_bytes()),
			DTypeId::F64 => dst.copy_from_slice(&value.to_le_bytes()),
			DTypeId::I32 => dst.copy_from_slice(&(self.round(value) as i32).to_le_bytes()),
			DTypeId::U32 => dst.copy_from_slice(&(self.round(value) as u32).to_le_bytes()),
		}
	}

	/// Reads a value encoded by `encode()`.
	pub fn decode(self, src: &[u8]) -> f64 {
		debug_assert!(src.len() == self.bytes());
		let mut b2 = [0_u8; 2];
		let mut b4 = [0_u8; 4];
		let mut b8 = [0_u8; 8];
		match self.id() {
			DTypeId::F16 => {
				b2.copy_from_slice(src);
				f16::from_le_bytes(b2).to_f64()
			},
			DTypeId::F32 => {
				b4.copy_from_slice(src);
				f64::from(f32::from_le_bytes(b4))
			},
			DTypeId::F64 => {
				b8.copy_from_slice(src);
				f64::from_le_bytes(b8)
			},
			DTypeId::I32 => {
				b4.copy_from_slice(src);
				f64::from(i32::from_le_bytes(b4))
			},
			DTypeId::U32 => {
				b4.copy_from_slice(src);
				f64::from(u32::from_le_bytes(b4))
			},
		}
	}
}

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DTypeKind {
	Float = 1,
	Int,
	Uint,
}

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DTypeId {
	F16 = 1,
	F32 = 2,
	F64 = 3,
	I32 = 4,
	U32 = 5,
}

impl DTypeId {
	pub const fn from_u8(id: u8) -> Option<Self> {
		match id {
			1 => Some(Self::F16),
			2 => Some(Self::F32),
			3 => Some(Self::F64),
			4 => Some(Self::I32),
			5 => Some(Self::U32),
			_ => None,
		}
	}

	pub const fn kind(self) -> DTypeKind {
		match self {
			Self::F16 | Self::F32 | Self::F64 => DTypeKind::Float,
			Self::I32 => DTypeKind::Int,
			Self::U32 => DTypeKind::Uint,
		}
	}
}

impl std::fmt::Display for DType {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self.id() {
			DTypeId::F16 => write!(f, "f16"),
			DTypeId::F32 => write!(f, "f32"),
			DTypeId::F64 => write!(f, "f64"),
			DTypeId::I32 => write!(f, "i32"),
			DTypeId::U32 => write!(f, "u32"),
		}
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_dtype_roundtrip_through_struct() {
		for dtype in [f16::dtype, f32::dtype, f64::dtype, i32::dtype, u32::dtype] {
			assert_eq!(DTypeId::from_u8(dtype.id() as u8), Some(dtype.id()));
			assert_eq!(dtype.id().kind(), dtype.kind());
		}
		assert_eq!(f16::dtype.bytes(), 2);
		assert_eq!(f32::dtype.bytes(), 4);
		assert_eq!(f64::dtype.bytes(), 8);
		assert!(f16::dtype.is_float());
		assert_eq!(i32::dtype.kind(), DTypeKind::Int);
	}

	#[test]
	fn test_f16_encoding() {
		let mut buf = [0_u8; 2];
		f16::dtype.encode(1.0, &mut buf);
		assert_eq!(u16::from_le_bytes(buf), 0x3C00);
		assert_eq!(f16::dtype.decode(&buf), 1.0);

		// 1/3 is not representable, the decoded value is the rounded one
		f16::dtype.encode(1.0 / 3.0, &mut buf);
		assert_eq!(f16::dtype.decode(&buf), f16::dtype.round(1.0 / 3.0));
	}

	#[test]
	fn test_int_rounding() {
		assert_eq!(i32::dtype.round(-2.7), -2.0);
		assert_eq!(u32::dtype.round(-2.7), 0.0);
		assert_eq!(i32::dtype.round(f64::NAN), 0.0);
		assert_eq!(f64::dtype.wgsl_type(), None);
		assert_eq!(f16::dtype.wgsl_type(), Some("f16"));
	}
}
