// Test-only SPIR-V module builder
//
// Thin layer over `rspirv::dr::Builder` that declares interface variables the
// way glslang lays them out, plus an empty `main`, so reflection and pipelines
// can be tested without a shader compiler.

use rspirv::binary::Assemble;
use rspirv::dr::{Builder, Operand};
use spirv::{
    AddressingModel, BuiltIn, Capability, Decoration, Dim, ExecutionMode, ExecutionModel, FunctionControl,
    ImageFormat, MemoryModel, StorageClass, Word,
};

pub(crate) struct SpirvBuilder {
    builder: Builder,
    execution_model: ExecutionModel,
    interface: Vec<Word>,
}

impl SpirvBuilder {
    pub fn vertex() -> Self {
        Self::new(ExecutionModel::Vertex)
    }

    pub fn fragment() -> Self {
        Self::new(ExecutionModel::Fragment)
    }

    fn new(execution_model: ExecutionModel) -> Self {
        let mut builder = Builder::new();
        builder.set_version(1, 3);
        builder.capability(Capability::Shader);
        builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        Self {
            builder,
            execution_model,
            interface: Vec::new(),
        }
    }

    fn name(&mut self, id: Word, name: &str) {
        if !name.is_empty() {
            self.builder.name(id, name);
        }
    }

    fn decorate(&mut self, id: Word, decoration: Decoration, literal: Option<u32>) {
        let operands: Vec<Operand> = literal.into_iter().map(Operand::LiteralBit32).collect();
        self.builder.decorate(id, decoration, operands);
    }

    /// `struct { vec4 }` with an explicit offset, named `name`
    fn type_block(&mut self, name: &str) -> Word {
        let float = self.builder.type_float(32);
        let vec4 = self.builder.type_vector(float, 4);
        let id = self.builder.type_struct(vec![vec4]);
        self.builder
            .member_decorate(id, 0, Decoration::Offset, vec![Operand::LiteralBit32(0)]);
        self.decorate(id, Decoration::Block, None);
        self.name(id, name);
        id
    }

    fn type_sampled_image(&mut self) -> Word {
        let float = self.builder.type_float(32);
        let image = self
            .builder
            .type_image(float, Dim::Dim2D, 0, 0, 0, 1, ImageFormat::Unknown, None);
        self.builder.type_sampled_image(image)
    }

    fn variable(&mut self, pointee: Word, storage: StorageClass, name: &str) -> Word {
        let pointer = self.builder.type_pointer(None, storage, pointee);
        let id = self.builder.variable(pointer, None, storage, None);
        self.name(id, name);
        if matches!(storage, StorageClass::Input | StorageClass::Output) {
            self.interface.push(id);
        }
        id
    }

    fn descriptor(&mut self, pointee: Word, storage: StorageClass, name: &str, set: u32, binding: u32) {
        let id = self.variable(pointee, storage, name);
        self.decorate(id, Decoration::DescriptorSet, Some(set));
        self.decorate(id, Decoration::Binding, Some(binding));
    }

    fn located_input(&mut self, ty: Word, name: &str, location: u32) {
        let id = self.variable(ty, StorageClass::Input, name);
        self.decorate(id, Decoration::Location, Some(location));
    }

    fn vector(&mut self, component: Word, count: u32) -> Word {
        if count == 1 {
            component
        } else {
            self.builder.type_vector(component, count)
        }
    }

    /// `layout(location) in vecN name` (a scalar float when `components == 1`)
    pub fn input(mut self, name: &str, location: u32, components: u32) -> Self {
        let float = self.builder.type_float(32);
        let ty = self.vector(float, components);
        self.located_input(ty, name, location);
        self
    }

    pub fn input_int(mut self, name: &str, location: u32, components: u32, signed: bool) -> Self {
        let int = self.builder.type_int(32, signed as u32);
        let ty = self.vector(int, components);
        self.located_input(ty, name, location);
        self
    }

    pub fn input_f64(mut self, name: &str, location: u32) -> Self {
        self.builder.capability(Capability::Float64);
        let double = self.builder.type_float(64);
        self.located_input(double, name, location);
        self
    }

    pub fn builtin_vertex_index(mut self) -> Self {
        let int = self.builder.type_int(32, 1);
        let id = self.variable(int, StorageClass::Input, "gl_VertexIndex");
        self.decorate(id, Decoration::BuiltIn, Some(BuiltIn::VertexIndex as u32));
        self
    }

    /// `layout(set, binding) uniform Block { vec4 } instance;`
    pub fn uniform_block(mut self, instance: &str, block: &str, set: u32, binding: u32) -> Self {
        let ty = self.type_block(block);
        self.descriptor(ty, StorageClass::Uniform, instance, set, binding);
        self
    }

    /// `layout(set, binding) buffer Block { vec4 } instance;`
    pub fn storage_block(mut self, instance: &str, block: &str, set: u32, binding: u32) -> Self {
        let ty = self.type_block(block);
        self.descriptor(ty, StorageClass::StorageBuffer, instance, set, binding);
        self
    }

    pub fn sampled_image(mut self, name: &str, set: u32, binding: u32) -> Self {
        let ty = self.type_sampled_image();
        self.descriptor(ty, StorageClass::UniformConstant, name, set, binding);
        self
    }

    pub fn sampled_image_array(mut self, name: &str, set: u32, binding: u32, length: u32) -> Self {
        let element = self.type_sampled_image();
        let uint = self.builder.type_int(32, 0);
        let length = self.builder.constant_bit32(uint, length);
        let ty = self.builder.type_array(element, length);
        self.descriptor(ty, StorageClass::UniformConstant, name, set, binding);
        self
    }

    pub fn storage_image(mut self, name: &str, set: u32, binding: u32) -> Self {
        let float = self.builder.type_float(32);
        let ty = self
            .builder
            .type_image(float, Dim::Dim2D, 0, 0, 0, 2, ImageFormat::Rgba8, None);
        self.descriptor(ty, StorageClass::UniformConstant, name, set, binding);
        self
    }

    pub fn push_constant(mut self, instance: &str, block: &str) -> Self {
        let ty = self.type_block(block);
        self.variable(ty, StorageClass::PushConstant, instance);
        self
    }

    pub fn build(mut self) -> Vec<u32> {
        let void = self.builder.type_void();
        let function_type = self.builder.type_function(void, Vec::<Word>::new());
        let main = self
            .builder
            .begin_function(void, None, FunctionControl::NONE, function_type)
            .unwrap();
        self.builder.begin_block(None).unwrap();
        self.builder.ret().unwrap();
        self.builder.end_function().unwrap();

        self.builder
            .entry_point(self.execution_model, main, "main", self.interface.clone());
        if self.execution_model == ExecutionModel::Fragment {
            self.builder
                .execution_mode(main, ExecutionMode::OriginUpperLeft, Vec::<u32>::new());
        }

        self.builder.module().assemble()
    }
}
