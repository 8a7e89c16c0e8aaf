// SPIR-V reflection
//
// spirq does the module walk. This file maps what it finds onto the binding
// kinds the RHI supports and rejects everything else before the driver ever
// sees the shader.

use ash::vk;
use spirq::ty::{DescriptorType, ScalarType, Type};
use spirq::var::Variable;

use super::{BindingSlot, LayoutBinding, ResourceKind, ShaderReflection, ShaderStage, VertexAttribute};
use crate::error::{Result, RhiError};

const HEADER_WORDS: usize = 5;

/// Reflect a SPIR-V module that must contain an entry point for `stage`
pub fn reflect(code: &[u32], stage: ShaderStage) -> Result<ShaderReflection> {
    if code.len() < HEADER_WORDS {
        return Err(invalid("module is shorter than its header"));
    }
    if code[0] != spirv::MAGIC_NUMBER {
        return Err(invalid(format!("bad magic number {:#010x}", code[0])));
    }

    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| invalid(format!("{e:?}")))?;

    let entry = entry_points
        .iter()
        .find(|entry| entry.exec_model as u32 == stage.execution_model())
        .ok_or(RhiError::StageMismatch { expected: stage })?;

    let mut reflection = ShaderReflection::default();
    let mut inputs = Vec::new();

    for var in &entry.vars {
        match var {
            Variable::Input { name, location, ty, .. } if stage == ShaderStage::Vertex => {
                inputs.push((location.loc(), name.clone().unwrap_or_default(), ty));
            }
            Variable::Descriptor {
                name,
                desc_bind,
                desc_ty,
                ty,
                nbind,
                ..
            } => {
                let set = desc_bind.set();
                let binding = desc_bind.bind();
                let name = resource_name(name.as_deref(), ty).unwrap_or_else(|| format!("set{set}_binding{binding}"));
                let kind = descriptor_kind(desc_ty, &name)?;
                if *nbind == 0 {
                    return Err(RhiError::UnsupportedResource {
                        name,
                        reason: "runtime-sized descriptor arrays are not supported",
                    });
                }
                add_descriptor(&mut reflection, stage, &name, set, binding, kind, *nbind)?;
            }
            Variable::PushConstant { name, ty, .. } => {
                return Err(RhiError::UnsupportedResource {
                    name: resource_name(name.as_deref(), ty).unwrap_or_default(),
                    reason: "push constant blocks are not supported",
                });
            }
            _ => {}
        }
    }

    // One vertex buffer per attribute, bound in location order
    inputs.sort_by_key(|(location, _, _)| *location);
    for (binding, (location, name, ty)) in inputs.into_iter().enumerate() {
        let (format, stride) = vertex_format(ty).ok_or_else(|| RhiError::UnsupportedFormat {
            name: name.clone(),
            element: describe(ty),
        })?;
        reflection.vertex_inputs.push(VertexAttribute {
            name,
            location,
            binding: binding as u32,
            format,
            stride,
        });
    }

    for bindings in reflection.sets.values_mut() {
        bindings.sort_by_key(|binding| binding.binding);
    }

    Ok(reflection)
}

fn invalid(message: impl Into<String>) -> RhiError {
    RhiError::InvalidShader(message.into())
}

/// Variable name, falling back to the block type name for anonymous blocks
fn resource_name(name: Option<&str>, ty: &Type) -> Option<String> {
    if let Some(name) = name.filter(|name| !name.is_empty()) {
        return Some(name.to_string());
    }

    let ty = match ty {
        Type::Array(array) => &*array.element_ty,
        other => other,
    };
    match ty {
        Type::Struct(block) => block.name.clone().filter(|name| !name.is_empty()),
        _ => None,
    }
}

fn descriptor_kind(desc_ty: &DescriptorType, name: &str) -> Result<ResourceKind> {
    let reason = match desc_ty {
        DescriptorType::UniformBuffer(..) => return Ok(ResourceKind::UniformBuffer),
        DescriptorType::StorageBuffer(..) => return Ok(ResourceKind::StorageBuffer),
        DescriptorType::CombinedImageSampler(..) => return Ok(ResourceKind::CombinedImageSampler),
        DescriptorType::StorageImage(..) => "storage images are not supported",
        DescriptorType::UniformTexelBuffer(..) | DescriptorType::StorageTexelBuffer(..) => {
            "texel buffers are not supported"
        }
        DescriptorType::SampledImage(..) => "separate images are not supported, use a combined image sampler",
        DescriptorType::Sampler(..) => "separate samplers are not supported, use a combined image sampler",
        _ => "unrecognised descriptor type",
    };
    Err(RhiError::UnsupportedResource {
        name: name.to_string(),
        reason,
    })
}

fn add_descriptor(
    reflection: &mut ShaderReflection,
    stage: ShaderStage,
    name: &str,
    set: u32,
    binding: u32,
    kind: ResourceKind,
    count: u32,
) -> Result<()> {
    let bindings = reflection.sets.entry(set).or_default();
    match bindings.iter_mut().find(|existing| existing.binding == binding) {
        Some(existing) if existing.kind != kind => {
            return Err(RhiError::BindingConflict {
                set,
                binding,
                first: existing.kind,
                second: kind,
            });
        }
        Some(existing) => existing.count = existing.count.max(count),
        None => bindings.push(LayoutBinding {
            binding,
            kind,
            count,
            stages: stage.flags(),
        }),
    }

    reflection.directory.insert(name, BindingSlot { set, binding, kind })
}

/// 32-bit float/int/uint scalars and vectors of up to four components
fn vertex_format(ty: &Type) -> Option<(vk::Format, u32)> {
    let (scalar, count) = match ty {
        Type::Scalar(scalar) => (scalar, 1),
        Type::Vector(vector) => (&vector.scalar_ty, vector.nscalar as u32),
        _ => return None,
    };

    let format = match (scalar, count) {
        (ScalarType::Float { bits: 32 }, 1) => vk::Format::R32_SFLOAT,
        (ScalarType::Float { bits: 32 }, 2) => vk::Format::R32G32_SFLOAT,
        (ScalarType::Float { bits: 32 }, 3) => vk::Format::R32G32B32_SFLOAT,
        (ScalarType::Float { bits: 32 }, 4) => vk::Format::R32G32B32A32_SFLOAT,
        (ScalarType::Integer { bits: 32, is_signed: true }, 1) => vk::Format::R32_SINT,
        (ScalarType::Integer { bits: 32, is_signed: true }, 2) => vk::Format::R32G32_SINT,
        (ScalarType::Integer { bits: 32, is_signed: true }, 3) => vk::Format::R32G32B32_SINT,
        (ScalarType::Integer { bits: 32, is_signed: true }, 4) => vk::Format::R32G32B32A32_SINT,
        (ScalarType::Integer { bits: 32, is_signed: false }, 1) => vk::Format::R32_UINT,
        (ScalarType::Integer { bits: 32, is_signed: false }, 2) => vk::Format::R32G32_UINT,
        (ScalarType::Integer { bits: 32, is_signed: false }, 3) => vk::Format::R32G32B32_UINT,
        (ScalarType::Integer { bits: 32, is_signed: false }, 4) => vk::Format::R32G32B32A32_UINT,
        _ => return None,
    };

    Some((format, 4 * count))
}

fn describe_scalar(scalar: &ScalarType) -> String {
    match scalar {
        ScalarType::Float { bits } => format!("{bits}-bit float"),
        ScalarType::Integer { bits, is_signed: true } => format!("{bits}-bit int"),
        ScalarType::Integer { bits, is_signed: false } => format!("{bits}-bit uint"),
        ScalarType::Boolean => "bool".to_string(),
        ScalarType::Void => "void".to_string(),
    }
}

fn describe(ty: &Type) -> String {
    match ty {
        Type::Scalar(scalar) => describe_scalar(scalar),
        Type::Vector(vector) => {
            format!("{}-component vector of {}", vector.nscalar, describe_scalar(&vector.scalar_ty))
        }
        Type::Matrix(matrix) => format!("matrix with {} columns", matrix.nvector),
        Type::Struct(_) => "struct".to_string(),
        Type::Array(_) => "array".to_string(),
        _ => "opaque type".to_string(),
    }
}
