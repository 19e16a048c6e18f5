use crate::vm::IsolationLevel;

#[derive(Debug, PartialEq)]
pub enum Statement {
    Begin(Begin),
    Commit,
    Abort,
    Show,
    Create(Create),
    Drop(Drop),
    Insert(Insert),
    Select(Select),
    Update(Update),
    Delete(Delete),
}

#[derive(Debug, PartialEq)]
pub struct Begin {
    pub level: IsolationLevel,
}

#[derive(Debug, PartialEq)]
pub struct Create {
    pub table: String,
    pub fields: Vec<(String, String)>,
    pub indexes: Vec<String>,
}

#[derive(Debug, PartialEq)]
pub struct Drop {
    pub table: String,
}

#[derive(Debug, PartialEq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<String>,
}

#[derive(Debug, PartialEq)]
pub struct Select {
    pub fields: Vec<String>,
    pub table: String,
    pub where_clause: Option<Where>,
}

#[derive(Debug, PartialEq)]
pub struct Update {
    pub table: String,
    pub field: String,
    pub value: String,
    pub where_clause: Option<Where>,
}

#[derive(Debug, PartialEq)]
pub struct Delete {
    pub table: String,
    pub where_clause: Where,
}

#[derive(Debug, PartialEq)]
pub struct Where {
    pub first: Comparison,
    pub rest: Option<(LogicOp, Comparison)>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, PartialEq)]
pub struct Comparison {
    pub field: String,
    pub op: CmpOp,
    pub value: String,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CmpOp {
    Eq,
    Lt,
    Gt,
}
