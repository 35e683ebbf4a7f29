//! Op codes. Each instruction is one 16-bit word followed by its operands,
//! also one word each.

use iota::iota;

iota! {
    pub const CONSTANT: u16 = iota;
        , NULL
        , TRUE
        , FALSE
        , POP
        , POPN
        , DUP
        , GET_LOCAL
        , SET_LOCAL
        , GET_GLOBAL
        , DEFINE_GLOBAL
        , SET_GLOBAL
        , DELETE_GLOBAL
        , GET_UPVALUE
        , SET_UPVALUE
        , GET_PROPERTY
        , SET_PROPERTY
        , GET_NATIVE
        , GET_CLASS
        , ADD
        , SUB
        , MUL
        , DIV
        , MOD
        , EQ
        , NE
        , SEQ
        , SNE
        , LT
        , LE
        , GT
        , GE
        , AND
        , OR
        , NEG
        , NOT
        , INC
        , DEC
        , JUMP
        , JUMP_IF_FALSE
        , JUMP_IF_TRUE
        , JUMP_IF_NULL
        , JUMP_IF_NOT_NULL
        , JUMP_CASE
        , JUMP_LIST
        , LOOP
        , CALL
        , INVOKE
        , CLOSURE
        , CLOSE_UPVALUE
        , RETURN
        , CLASS
        , METHOD
        , PRINT
        , TABLE
        , STACK
        , VECTOR
        , ARRAY
        , GET_INDEX
        , SET_INDEX
        , LEN
        , PUSH_VALUE
        , POP_VALUE
        , COPY
        , REMOVE
        , EACH
}

/// Mnemonic of an op code, for tracing.
pub fn name(op: u16) -> &'static str {
    const NAMES: [&str; 66] = [
        "CONSTANT",
        "NULL",
        "TRUE",
        "FALSE",
        "POP",
        "POPN",
        "DUP",
        "GET_LOCAL",
        "SET_LOCAL",
        "GET_GLOBAL",
        "DEFINE_GLOBAL",
        "SET_GLOBAL",
        "DELETE_GLOBAL",
        "GET_UPVALUE",
        "SET_UPVALUE",
        "GET_PROPERTY",
        "SET_PROPERTY",
        "GET_NATIVE",
        "GET_CLASS",
        "ADD",
        "SUB",
        "MUL",
        "DIV",
        "MOD",
        "EQ",
        "NE",
        "SEQ",
        "SNE",
        "LT",
        "LE",
        "GT",
        "GE",
        "AND",
        "OR",
        "NEG",
        "NOT",
        "INC",
        "DEC",
        "JUMP",
        "JUMP_IF_FALSE",
        "JUMP_IF_TRUE",
        "JUMP_IF_NULL",
        "JUMP_IF_NOT_NULL",
        "JUMP_CASE",
        "JUMP_LIST",
        "LOOP",
        "CALL",
        "INVOKE",
        "CLOSURE",
        "CLOSE_UPVALUE",
        "RETURN",
        "CLASS",
        "METHOD",
        "PRINT",
        "TABLE",
        "STACK",
        "VECTOR",
        "ARRAY",
        "GET_INDEX",
        "SET_INDEX",
        "LEN",
        "PUSH_VALUE",
        "POP_VALUE",
        "COPY",
        "REMOVE",
        "EACH",
    ];
    NAMES.get(op as usize).copied().unwrap_or("UNKNOWN")
}
