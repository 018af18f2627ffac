//! Typed statement/expression tree consumed by the generator.
//!
//! Parsing lives outside this crate; front ends build these nodes directly.

use crate::object::{Payload, Type, TypeTag};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeName {
    Auto,
    Byte,
    Long,
    Double,
    Uint64,
    String,
    Class(String),
}

impl TypeName {
    pub fn tag(&self) -> TypeTag {
        match self {
            TypeName::Auto => TypeTag::Auto,
            TypeName::Byte => TypeTag::Byte,
            TypeName::Long => TypeTag::Long,
            TypeName::Double => TypeTag::Double,
            TypeName::Uint64 => TypeTag::Uint64,
            TypeName::String => TypeTag::String,
            TypeName::Class(_) => TypeTag::Class,
        }
    }

    pub fn to_type(&self) -> Type {
        Type::scalar(self.tag())
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            TypeName::Class(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Byte(i8),
    Long(i64),
    Double(f64),
    Uint64(u64),
    String(String),
}

impl Literal {
    pub fn payload(&self) -> Payload {
        match self {
            Literal::Byte(v) => Payload::Byte(*v),
            Literal::Long(v) => Payload::Long(*v),
            Literal::Double(v) => Payload::Double(*v),
            Literal::Uint64(v) => Payload::Uint64(*v),
            Literal::String(s) => Payload::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    /// Reference to the operand.
    Ref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    New {
        ty: TypeName,
        size: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn long(value: i64) -> Self {
        Expr::Literal(Literal::Long(value))
    }

    pub fn double(value: f64) -> Self {
        Expr::Literal(Literal::Double(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn method(object: Expr, method: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::MethodCall {
            object: Box::new(object),
            method: method.into(),
            args,
        }
    }

    pub fn member(object: Expr, name: impl Into<String>) -> Self {
        Expr::Member {
            object: Box::new(object),
            name: name.into(),
        }
    }

    pub fn index(array: Expr, index: Expr) -> Self {
        Expr::Index {
            array: Box::new(array),
            index: Box::new(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeName,
    pub constant: bool,
    /// Declared as a reference; the initializer names the referent.
    pub reference: bool,
    /// Element count for array declarations.
    pub size: Option<Expr>,
    pub init: Option<Expr>,
}

impl VarDecl {
    pub fn new(name: impl Into<String>, ty: TypeName) -> Self {
        Self {
            name: name.into(),
            ty,
            constant: false,
            reference: false,
            size: None,
            init: None,
        }
    }

    pub fn init(mut self, init: Expr) -> Self {
        self.init = Some(init);
        self
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn reference(mut self) -> Self {
        self.reference = true;
        self
    }

    pub fn array(mut self, size: Expr) -> Self {
        self.size = Some(size);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeName,
    pub reference: bool,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeName) -> Self {
        Self {
            name: name.into(),
            ty,
            reference: false,
        }
    }

    pub fn reference(mut self) -> Self {
        self.reference = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    /// The last parameter collects surplus arguments into an array.
    pub variadic: bool,
    pub return_type: TypeName,
    pub body: Vec<Stmt>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            params,
            variadic: false,
            return_type: TypeName::Auto,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub members: Vec<VarDecl>,
    pub methods: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Vec<Stmt>),
    Expr(Expr),
    Var(VarDecl),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Label(String),
    Goto(String),
    Return(Option<Expr>),
    Function(FunctionDecl),
    Class(ClassDecl),
}

impl Stmt {
    pub fn label(name: impl Into<String>) -> Self {
        Stmt::Label(name.into())
    }

    pub fn goto(name: impl Into<String>) -> Self {
        Stmt::Goto(name.into())
    }

    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr(expr)
    }

    pub fn while_loop(cond: Expr, body: Vec<Stmt>) -> Self {
        Stmt::While {
            cond,
            body: Box::new(Stmt::Block(body)),
        }
    }

    pub fn if_else(cond: Expr, then: Vec<Stmt>, otherwise: Option<Vec<Stmt>>) -> Self {
        Stmt::If {
            cond,
            then: Box::new(Stmt::Block(then)),
            otherwise: otherwise.map(|body| Box::new(Stmt::Block(body))),
        }
    }
}
