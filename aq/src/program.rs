use crate::class::ClassRegistry;
use crate::function::{Function, SlotDecl};
use crate::object::Payload;

/// Name of the function the generator emits for top-level statements.
pub const ENTRY: &str = "@start";

/// Everything the VM loader needs: the global constant pool and layout,
/// the function table and the class registry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub constants: Vec<Payload>,
    pub globals: Vec<SlotDecl>,
    pub functions: Vec<Function>,
    pub classes: ClassRegistry,
    pub entry: String,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Mnemonic form of every function and method.
    pub fn mnemonic(&self) -> String {
        let mut out = String::new();
        for function in &self.functions {
            out.push_str(&function.to_string());
        }
        for class in self.classes.iter() {
            for method in class.methods() {
                out.push_str(&format!("Class: {}\n", class.name));
                out.push_str(&method.to_string());
            }
        }
        out
    }
}
