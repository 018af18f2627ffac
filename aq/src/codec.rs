//! Binary artifact format.
//!
//! A file starts with the magic `AQBC` and a big-endian format version,
//! followed by a byte-order marker word. Everything after the marker is a
//! stream of 64-bit words in the writer's native order; a reader on a host
//! of the other endianness sees the marker swapped and swaps every word.
//!
//! String bytes are packed eight per word, most significant byte first, so
//! they survive the word swap unchanged.

use std::io::Write;

use log::{debug, warn};

use crate::class::{Class, ClassRegistry};
use crate::error::{CodecError, CodecResult};
use crate::function::{Function, SlotDecl};
use crate::instruction::Instruction;
use crate::object::{NativeHandle, Payload, Type, TypeTag};
use crate::op::Op;
use crate::program::Program;

pub const MAGIC: [u8; 4] = *b"AQBC";
pub const VERSION: u32 = 3;
const BYTE_ORDER: u64 = 0x0102_0304_0506_0708;

/// Serializes a program.
pub fn encode(program: &Program) -> Vec<u8> {
    let mut writer = ProgramWriter::new();
    writer.program(program);
    writer.into_inner()
}

/// Writes the encoded program to `out`.
pub fn write_to(program: &Program, out: &mut impl Write) -> CodecResult<()> {
    out.write_all(&encode(program))?;
    Ok(())
}

/// Parses a program previously produced by [`encode`].
pub fn decode(bytes: &[u8]) -> CodecResult<Program> {
    let mut reader = ProgramReader::new(bytes)?;
    let program = reader.program()?;
    debug!(
        "decoded {} functions, {} classes (byte-swapped: {})",
        program.functions.len(),
        program.classes.len(),
        reader.swapped
    );
    Ok(program)
}

struct ProgramWriter {
    bytes: Vec<u8>,
}

impl ProgramWriter {
    fn new() -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&VERSION.to_be_bytes());
        let mut writer = Self { bytes };
        writer.word(BYTE_ORDER);
        writer
    }

    fn into_inner(self) -> Vec<u8> {
        self.bytes
    }

    fn word(&mut self, word: u64) {
        self.bytes.extend_from_slice(&word.to_ne_bytes());
    }

    fn count(&mut self, count: usize) {
        self.word(count as u64);
    }

    fn string(&mut self, text: &str) {
        self.count(text.len());
        for chunk in text.as_bytes().chunks(8) {
            let mut packed = [0u8; 8];
            packed[..chunk.len()].copy_from_slice(chunk);
            self.word(u64::from_be_bytes(packed));
        }
    }

    fn ty(&mut self, ty: &Type) {
        self.count(ty.tags().len());
        for &tag in ty.tags() {
            self.word(tag as u64);
        }
    }

    fn payload(&mut self, payload: &Payload) {
        match payload {
            Payload::Byte(v) => {
                self.word(TypeTag::Byte as u64);
                self.word(*v as u8 as u64);
            }
            Payload::Long(v) => {
                self.word(TypeTag::Long as u64);
                self.word(*v as u64);
            }
            Payload::Double(v) => {
                self.word(TypeTag::Double as u64);
                self.word(v.to_bits());
            }
            Payload::Uint64(v) => {
                self.word(TypeTag::Uint64 as u64);
                self.word(*v);
            }
            Payload::String(text) => {
                self.word(TypeTag::String as u64);
                self.string(text);
            }
            Payload::Native(handle) => {
                self.word(TypeTag::Native as u64);
                self.word(handle.0);
            }
            Payload::Absent => self.word(TypeTag::Auto as u64),
            other => {
                warn!("runtime-only {} constant written as absent", other.tag());
                self.word(TypeTag::Auto as u64);
            }
        }
    }

    fn decl(&mut self, decl: &SlotDecl) {
        self.ty(&decl.ty);
        self.word(decl.constant as u64);
    }

    fn function(&mut self, function: &Function) {
        self.string(&function.name);
        self.word(function.variadic as u64);
        self.count(function.parameters.len());
        for &parameter in &function.parameters {
            self.count(parameter);
        }
        self.count(function.frame.len());
        for decl in &function.frame {
            self.decl(decl);
        }
        self.count(function.code.len());
        for instruction in &function.code {
            self.word(instruction.op as u64 | (instruction.operands.len() as u64) << 8);
            for &operand in &instruction.operands {
                self.word(operand);
            }
        }
    }

    fn class(&mut self, class: &Class) {
        self.string(&class.name);
        self.count(class.members().len());
        for member in class.members() {
            self.string(&member.name);
            self.decl(&member.decl);
        }
        self.count(class.methods().len());
        for method in class.methods() {
            self.function(method);
        }
    }

    fn program(&mut self, program: &Program) {
        self.count(program.constants.len());
        for constant in &program.constants {
            self.payload(constant);
        }
        self.count(program.globals.len());
        for decl in &program.globals {
            self.decl(decl);
        }
        self.count(program.functions.len());
        for function in &program.functions {
            self.function(function);
        }
        self.count(program.classes.len());
        for class in program.classes.iter() {
            self.class(class);
        }
        self.string(&program.entry);
    }
}

struct ProgramReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    swapped: bool,
}

impl<'a> ProgramReader<'a> {
    fn new(bytes: &'a [u8]) -> CodecResult<Self> {
        if bytes.len() < 8 || bytes[..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let mut reader = Self {
            bytes,
            pos: 8,
            swapped: false,
        };
        match reader.word()? {
            BYTE_ORDER => {}
            marker if marker.swap_bytes() == BYTE_ORDER => reader.swapped = true,
            marker => return Err(CodecError::BadByteOrder(marker)),
        }
        Ok(reader)
    }

    fn word(&mut self) -> CodecResult<u64> {
        let end = self.pos + 8;
        let chunk = self.bytes.get(self.pos..end).ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let word = u64::from_ne_bytes(raw);
        Ok(if self.swapped { word.swap_bytes() } else { word })
    }

    /// A length prefix. Bounded by what is left so a corrupt count cannot
    /// trigger a huge allocation.
    fn count(&mut self) -> CodecResult<usize> {
        let count = self.word()?;
        let remaining = (self.bytes.len() - self.pos) as u64;
        if count > remaining {
            return Err(CodecError::UnexpectedEof);
        }
        Ok(count as usize)
    }

    fn flag(&mut self) -> CodecResult<bool> {
        Ok(self.word()? != 0)
    }

    fn string(&mut self) -> CodecResult<String> {
        let len = self.count()?;
        let mut bytes = Vec::with_capacity(len);
        while bytes.len() < len {
            let packed = self.word()?.to_be_bytes();
            let take = (len - bytes.len()).min(8);
            bytes.extend_from_slice(&packed[..take]);
        }
        Ok(String::from_utf8(bytes)?)
    }

    fn tag(&mut self) -> CodecResult<TypeTag> {
        let byte = self.word()? as u8;
        TypeTag::try_from(byte).map_err(CodecError::InvalidTypeTag)
    }

    fn ty(&mut self) -> CodecResult<Type> {
        let count = self.count()?;
        let tags = (0..count)
            .map(|_| self.tag())
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Type::new(tags))
    }

    fn payload(&mut self) -> CodecResult<Payload> {
        Ok(match self.tag()? {
            TypeTag::Byte => Payload::Byte(self.word()? as u8 as i8),
            TypeTag::Long => Payload::Long(self.word()? as i64),
            TypeTag::Double => Payload::Double(f64::from_bits(self.word()?)),
            TypeTag::Uint64 => Payload::Uint64(self.word()?),
            TypeTag::String => Payload::String(self.string()?),
            TypeTag::Native => Payload::Native(NativeHandle(self.word()?)),
            TypeTag::Auto => Payload::Absent,
            other => return Err(CodecError::InvalidTypeTag(other as u8)),
        })
    }

    fn decl(&mut self) -> CodecResult<SlotDecl> {
        let ty = self.ty()?;
        Ok(SlotDecl::new(ty, self.flag()?))
    }

    fn instruction(&mut self) -> CodecResult<Instruction> {
        let header = self.word()?;
        let op = Op::try_from(header as u8).map_err(CodecError::InvalidOpcode)?;
        let count = (header >> 8) as usize;
        let operands = (0..count)
            .map(|_| self.word())
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Instruction::new(op, operands))
    }

    fn function(&mut self) -> CodecResult<Function> {
        let mut function = Function::new(self.string()?);
        function.variadic = self.flag()?;
        let parameters = self.count()?;
        for _ in 0..parameters {
            let parameter = self.word()? as usize;
            function.parameters.push(parameter);
        }
        let frame = self.count()?;
        for _ in 0..frame {
            let decl = self.decl()?;
            function.frame.push(decl);
        }
        let code = self.count()?;
        for _ in 0..code {
            let instruction = self.instruction()?;
            function.code.push(instruction);
        }
        Ok(function)
    }

    fn class(&mut self) -> CodecResult<Class> {
        let mut class = Class::new(self.string()?);
        let members = self.count()?;
        for _ in 0..members {
            let name = self.string()?;
            let decl = self.decl()?;
            class.add_member(name, decl);
        }
        let methods = self.count()?;
        for _ in 0..methods {
            let method = self.function()?;
            class.add_method(method);
        }
        Ok(class)
    }

    fn program(&mut self) -> CodecResult<Program> {
        let mut program = Program::default();
        let constants = self.count()?;
        for _ in 0..constants {
            let constant = self.payload()?;
            program.constants.push(constant);
        }
        let globals = self.count()?;
        for _ in 0..globals {
            let decl = self.decl()?;
            program.globals.push(decl);
        }
        let functions = self.count()?;
        for _ in 0..functions {
            let function = self.function()?;
            program.functions.push(function);
        }
        let classes = self.count()?;
        let mut registry = ClassRegistry::new();
        for _ in 0..classes {
            registry.register(self.class()?);
        }
        program.classes = registry;
        program.entry = self.string()?;
        Ok(program)
    }
}
