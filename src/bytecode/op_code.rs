use std::fmt;

/// Offset between the head and goal argument-opcode families. The two
/// families are the same four opcodes; the compiler selects the family by
/// adding this offset when emitting body arguments, and the VM subtracts
/// it when dispatching.
pub const GOAL_OFFSET: u8 = 16;

/// Goal-VM opcodes. One byte each, followed by zero or more byte operands.
///
/// Argument opcodes come in two families: head opcodes match the caller's
/// argument cells while a clause is being entered; goal opcodes push the
/// next goal's argument cells instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Control
    CNoGoal = 0,
    CCall = 1,
    CLastCall = 2,
    CCut = 3,
    CFail = 4,
    CGoal = 5,     // operand: object-pool index of the target predicate
    CMetaGoal = 6, // operand: argument count; pops the resolved target

    // Inline builtins
    BVar = 7,      // operand: slot
    BNonvar = 8,   // operand: slot
    BCompare = 9,  // operand: comparison kind; two expression blocks follow
    BTypeTest = 10, // operands: type kind, slot
    BUnsafeSet = 11, // operand: slot; expression block follows
    BUnsafeInit = 12,
    BUnsafeInitZero = 13,
    BUnsafeInitZeroInt = 14,
    BMaximize = 15, // operand: slot; expression block follows
    BMinimize = 16,
    BSumRepeat = 17,
    BIncRepeat = 18,
    BThrow = 19, // expression block follows
    BCallFailed = 20, // operand: object-pool index of the goal description

    // Head argument family
    HeadVoid = 24,
    HeadVarFirst = 25, // operand: slot
    HeadVarMatch = 26, // operand: slot
    HeadConst = 27,    // operands: const kind, then kind-specific payload

    // Goal argument family = head family + GOAL_OFFSET
    GoalVoid = 40,
    GoalVarFirst = 41,
    GoalVarMatch = 42,
    GoalConst = 43,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        Some(match byte {
            0 => OpCode::CNoGoal,
            1 => OpCode::CCall,
            2 => OpCode::CLastCall,
            3 => OpCode::CCut,
            4 => OpCode::CFail,
            5 => OpCode::CGoal,
            6 => OpCode::CMetaGoal,
            7 => OpCode::BVar,
            8 => OpCode::BNonvar,
            9 => OpCode::BCompare,
            10 => OpCode::BTypeTest,
            11 => OpCode::BUnsafeSet,
            12 => OpCode::BUnsafeInit,
            13 => OpCode::BUnsafeInitZero,
            14 => OpCode::BUnsafeInitZeroInt,
            15 => OpCode::BMaximize,
            16 => OpCode::BMinimize,
            17 => OpCode::BSumRepeat,
            18 => OpCode::BIncRepeat,
            19 => OpCode::BThrow,
            20 => OpCode::BCallFailed,
            24 => OpCode::HeadVoid,
            25 => OpCode::HeadVarFirst,
            26 => OpCode::HeadVarMatch,
            27 => OpCode::HeadConst,
            40 => OpCode::GoalVoid,
            41 => OpCode::GoalVarFirst,
            42 => OpCode::GoalVarMatch,
            43 => OpCode::GoalConst,
            _ => return None,
        })
    }

    /// The goal-family counterpart of a head argument opcode.
    pub fn goal_form(self) -> OpCode {
        match self {
            OpCode::HeadVoid => OpCode::GoalVoid,
            OpCode::HeadVarFirst => OpCode::GoalVarFirst,
            OpCode::HeadVarMatch => OpCode::GoalVarMatch,
            OpCode::HeadConst => OpCode::GoalConst,
            other => other,
        }
    }

    /// The head-family counterpart of a goal argument opcode.
    pub fn head_form(self) -> OpCode {
        match self {
            OpCode::GoalVoid => OpCode::HeadVoid,
            OpCode::GoalVarFirst => OpCode::HeadVarFirst,
            OpCode::GoalVarMatch => OpCode::HeadVarMatch,
            OpCode::GoalConst => OpCode::HeadConst,
            other => other,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Payload selector for `HeadConst`/`GoalConst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConstKind {
    Int = 0,    // operand: int-pool index
    Float = 1,  // operand: float-pool index
    Bool = 2,   // operand: immediate 0/1
    Object = 3, // operand: object-pool index
    Pred = 4,   // operand: object-pool index of a predicate handle
    Expr = 5,   // an expression block follows, terminated by FReturn
}

impl ConstKind {
    pub fn from_byte(byte: u8) -> Option<ConstKind> {
        Some(match byte {
            0 => ConstKind::Int,
            1 => ConstKind::Float,
            2 => ConstKind::Bool,
            3 => ConstKind::Object,
            4 => ConstKind::Pred,
            5 => ConstKind::Expr,
            _ => return None,
        })
    }
}

/// Numeric comparison selector for `BCompare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmpKind {
    Less = 0,
    Greater = 1,
    LessEq = 2,
    GreaterEq = 3,
}

impl CmpKind {
    pub fn from_byte(byte: u8) -> Option<CmpKind> {
        Some(match byte {
            0 => CmpKind::Less,
            1 => CmpKind::Greater,
            2 => CmpKind::LessEq,
            3 => CmpKind::GreaterEq,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpKind::Less => "<",
            CmpKind::Greater => ">",
            CmpKind::LessEq => "=<",
            CmpKind::GreaterEq => ">=",
        }
    }
}

/// Type-test selector for `BTypeTest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeKind {
    Integer = 0,
    Float = 1,
    Number = 2,
    String = 3,
    Symbol = 4,
    Missing = 5,
}

impl TypeKind {
    pub fn from_byte(byte: u8) -> Option<TypeKind> {
        Some(match byte {
            0 => TypeKind::Integer,
            1 => TypeKind::Float,
            2 => TypeKind::Number,
            3 => TypeKind::String,
            4 => TypeKind::Symbol,
            5 => TypeKind::Missing,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Integer => "integer",
            TypeKind::Float => "float",
            TypeKind::Number => "number",
            TypeKind::String => "string",
            TypeKind::Symbol => "symbol",
            TypeKind::Missing => "missing",
        }
    }
}

/// Expression-VM opcodes. Expression blocks are embedded in goal-VM code
/// and always end with `FReturn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FOp {
    FReturn = 0,
    FSmallInt = 1, // operand: signed immediate byte
    FInt = 2,      // operand: int-pool index
    FFloat = 3,    // operand: float-pool index
    FBool = 4,     // operand: immediate 0/1
    FObject = 5,   // operand: object-pool index
    FLoad = 6,     // operand: slot; errors on unbound
    FLoadUnchecked = 7, // operand: slot; unbound loads as a cell reference
    FLoadGlobal = 8, // operand: object-pool index of the global's name
    FAdd = 9,
    FSub = 10,
    FMul = 11,
    FDiv = 12,
    FNeg = 13,
    FFieldRef = 14,
    FMethodCall = 15,   // operand: argument count
    FConstructor = 16,  // operand: argument count
    FComponentLookup = 17,
    FArray = 18,   // operand: element count
    FArrayList = 19,
    FHashset = 20,
    FNonFalse = 21,
    FFormat = 22,  // operand: argument count
    FUserFunction = 23, // operand: subop index
    FCallFunction = 24, // operand: argument count; name pushed below args
}

impl FOp {
    pub fn from_byte(byte: u8) -> Option<FOp> {
        Some(match byte {
            0 => FOp::FReturn,
            1 => FOp::FSmallInt,
            2 => FOp::FInt,
            3 => FOp::FFloat,
            4 => FOp::FBool,
            5 => FOp::FObject,
            6 => FOp::FLoad,
            7 => FOp::FLoadUnchecked,
            8 => FOp::FLoadGlobal,
            9 => FOp::FAdd,
            10 => FOp::FSub,
            11 => FOp::FMul,
            12 => FOp::FDiv,
            13 => FOp::FNeg,
            14 => FOp::FFieldRef,
            15 => FOp::FMethodCall,
            16 => FOp::FConstructor,
            17 => FOp::FComponentLookup,
            18 => FOp::FArray,
            19 => FOp::FArrayList,
            20 => FOp::FHashset,
            21 => FOp::FNonFalse,
            22 => FOp::FFormat,
            23 => FOp::FUserFunction,
            24 => FOp::FCallFunction,
            _ => return None,
        })
    }

    /// Number of operand bytes following this opcode.
    pub fn operand_width(self) -> usize {
        match self {
            FOp::FSmallInt
            | FOp::FInt
            | FOp::FFloat
            | FOp::FBool
            | FOp::FObject
            | FOp::FLoad
            | FOp::FLoadUnchecked
            | FOp::FLoadGlobal
            | FOp::FMethodCall
            | FOp::FConstructor
            | FOp::FArray
            | FOp::FArrayList
            | FOp::FHashset
            | FOp::FFormat
            | FOp::FUserFunction
            | FOp::FCallFunction => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for FOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Instructions = Vec<u8>;

pub fn read_u8(instructions: &[u8], offset: usize) -> u8 {
    instructions[offset]
}

pub fn read_i8(instructions: &[u8], offset: usize) -> i8 {
    instructions[offset] as i8
}

/// Advance past an expression block, returning the offset just after its
/// terminating `FReturn`.
pub fn skip_expr_block(instructions: &[u8], mut offset: usize) -> usize {
    while offset < instructions.len() {
        let Some(op) = FOp::from_byte(instructions[offset]) else {
            return instructions.len();
        };
        offset += 1 + op.operand_width();
        if op == FOp::FReturn {
            break;
        }
    }
    offset
}

fn disassemble_expr_block(instructions: &[u8], mut offset: usize, out: &mut String) -> usize {
    loop {
        if offset >= instructions.len() {
            return offset;
        }
        let Some(op) = FOp::from_byte(instructions[offset]) else {
            out.push_str(&format!("{:04}   f: <bad {}>\n", offset, instructions[offset]));
            return instructions.len();
        };
        let width = op.operand_width();
        if width == 1 {
            let operand = if op == FOp::FSmallInt {
                read_i8(instructions, offset + 1) as i64
            } else {
                read_u8(instructions, offset + 1) as i64
            };
            out.push_str(&format!("{:04}   f: {} {}\n", offset, op, operand));
        } else {
            out.push_str(&format!("{:04}   f: {}\n", offset, op));
        }
        offset += 1 + width;
        if op == FOp::FReturn {
            return offset;
        }
    }
}

/// Render bytecode as one instruction per line, expression blocks indented.
pub fn disassemble(instructions: &[u8]) -> String {
    let mut out = String::new();
    let mut offset = 0;

    while offset < instructions.len() {
        let Some(op) = OpCode::from_byte(instructions[offset]) else {
            out.push_str(&format!("{:04} <bad {}>\n", offset, instructions[offset]));
            break;
        };
        match op {
            OpCode::CNoGoal
            | OpCode::CCall
            | OpCode::CLastCall
            | OpCode::CCut
            | OpCode::CFail
            | OpCode::HeadVoid
            | OpCode::GoalVoid => {
                out.push_str(&format!("{:04} {}\n", offset, op));
                offset += 1;
            }
            OpCode::CGoal
            | OpCode::CMetaGoal
            | OpCode::BVar
            | OpCode::BNonvar
            | OpCode::BUnsafeInit
            | OpCode::BUnsafeInitZero
            | OpCode::BUnsafeInitZeroInt
            | OpCode::BIncRepeat
            | OpCode::BCallFailed
            | OpCode::HeadVarFirst
            | OpCode::HeadVarMatch
            | OpCode::GoalVarFirst
            | OpCode::GoalVarMatch => {
                out.push_str(&format!(
                    "{:04} {} {}\n",
                    offset,
                    op,
                    read_u8(instructions, offset + 1)
                ));
                offset += 2;
            }
            OpCode::BTypeTest => {
                let kind = TypeKind::from_byte(read_u8(instructions, offset + 1));
                let slot = read_u8(instructions, offset + 2);
                match kind {
                    Some(kind) => out.push_str(&format!(
                        "{:04} {} {} {}\n",
                        offset,
                        op,
                        kind.name(),
                        slot
                    )),
                    None => out.push_str(&format!("{:04} {} <bad kind> {}\n", offset, op, slot)),
                }
                offset += 3;
            }
            OpCode::BCompare => {
                let kind = CmpKind::from_byte(read_u8(instructions, offset + 1));
                match kind {
                    Some(kind) => {
                        out.push_str(&format!("{:04} {} {}\n", offset, op, kind.symbol()))
                    }
                    None => out.push_str(&format!("{:04} {} <bad kind>\n", offset, op)),
                }
                offset += 2;
                offset = disassemble_expr_block(instructions, offset, &mut out);
                offset = disassemble_expr_block(instructions, offset, &mut out);
            }
            OpCode::BUnsafeSet | OpCode::BMaximize | OpCode::BMinimize | OpCode::BSumRepeat => {
                out.push_str(&format!(
                    "{:04} {} {}\n",
                    offset,
                    op,
                    read_u8(instructions, offset + 1)
                ));
                offset += 2;
                offset = disassemble_expr_block(instructions, offset, &mut out);
            }
            OpCode::BThrow => {
                out.push_str(&format!("{:04} {}\n", offset, op));
                offset += 1;
                offset = disassemble_expr_block(instructions, offset, &mut out);
            }
            OpCode::HeadConst | OpCode::GoalConst => {
                let kind = ConstKind::from_byte(read_u8(instructions, offset + 1));
                match kind {
                    Some(ConstKind::Expr) => {
                        out.push_str(&format!("{:04} {} expr\n", offset, op));
                        offset += 2;
                        offset = disassemble_expr_block(instructions, offset, &mut out);
                    }
                    Some(kind) => {
                        out.push_str(&format!(
                            "{:04} {} {:?} {}\n",
                            offset,
                            op,
                            kind,
                            read_u8(instructions, offset + 2)
                        ));
                        offset += 3;
                    }
                    None => {
                        out.push_str(&format!("{:04} {} <bad kind>\n", offset, op));
                        offset += 2;
                    }
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_bytes() {
        for byte in 0..=255u8 {
            if let Some(op) = OpCode::from_byte(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        for byte in 0..=24u8 {
            let op = FOp::from_byte(byte).expect("contiguous F-op space");
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn test_goal_family_offset() {
        assert_eq!(OpCode::HeadVoid as u8 + GOAL_OFFSET, OpCode::GoalVoid as u8);
        assert_eq!(
            OpCode::HeadVarFirst as u8 + GOAL_OFFSET,
            OpCode::GoalVarFirst as u8
        );
        assert_eq!(
            OpCode::HeadVarMatch as u8 + GOAL_OFFSET,
            OpCode::GoalVarMatch as u8
        );
        assert_eq!(
            OpCode::HeadConst as u8 + GOAL_OFFSET,
            OpCode::GoalConst as u8
        );
        assert_eq!(OpCode::HeadVarFirst.goal_form(), OpCode::GoalVarFirst);
        assert_eq!(OpCode::GoalConst.head_form(), OpCode::HeadConst);
    }

    #[test]
    fn test_skip_expr_block() {
        // FSmallInt 2, FSmallInt 3, FAdd, FReturn
        let code = vec![
            FOp::FSmallInt as u8,
            2,
            FOp::FSmallInt as u8,
            3,
            FOp::FAdd as u8,
            FOp::FReturn as u8,
        ];
        assert_eq!(skip_expr_block(&code, 0), code.len());
    }

    #[test]
    fn test_disassemble_simple_clause() {
        // HeadVarFirst 0, CGoal 0, GoalVarMatch 0, CLastCall
        let code = vec![
            OpCode::HeadVarFirst as u8,
            0,
            OpCode::CGoal as u8,
            0,
            OpCode::GoalVarMatch as u8,
            0,
            OpCode::CLastCall as u8,
        ];
        let listing = disassemble(&code);
        assert_eq!(
            listing,
            "0000 HeadVarFirst 0\n0002 CGoal 0\n0004 GoalVarMatch 0\n0006 CLastCall\n"
        );
    }
}
