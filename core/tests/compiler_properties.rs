//! Properties of compiled filters over generated clause and bracket lists.

use filterdb_core::{
    ColumnClause, CompiledQuery, FilterCompiler, FilterEntry, FilterSpec, LogicOp, SchemaRegistry,
    Value,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Node {
    Clause(ColumnClause),
    Group(Option<LogicOp>, Vec<Node>),
}

fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::default();
    registry
        .add_table(
            "user",
            vec![
                ("id", "INTEGER", "PRIMARY KEY"),
                ("age", "INTEGER", ""),
                ("city", "TEXT", ""),
                ("name", "TEXT", ""),
            ],
            Vec::new(),
        )
        .unwrap();
    registry
}

fn logic() -> impl Strategy<Value = Option<LogicOp>> {
    prop_oneof![
        Just(None),
        Just(Some(LogicOp::And)),
        Just(Some(LogicOp::Or)),
        Just(Some(LogicOp::Xor)),
        Just(Some(LogicOp::Not)),
    ]
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        any::<bool>().prop_map(Value::Bool),
        "[a-z?'( ]{0,8}".prop_map(Value::Text),
    ]
}

fn ints(items: Vec<i64>) -> Value {
    Value::List(items.into_iter().map(Value::Integer).collect())
}

fn clause() -> impl Strategy<Value = ColumnClause> {
    let compare = (
        prop::sample::select(vec!["=", "!=", "<>", "<", ">=", "LIKE"]),
        scalar(),
    )
        .prop_map(|(op, value)| (op, Some(value)));
    let list = (
        prop::sample::select(vec!["IN", "NOT IN", "ANY"]),
        prop::collection::vec(any::<i64>(), 1..5),
    )
        .prop_map(|(op, items)| (op, Some(ints(items))));
    let between = (
        prop::sample::select(vec!["BETWEEN", "NOT BETWEEN"]),
        any::<i64>(),
        any::<i64>(),
    )
        .prop_map(|(op, lo, hi)| (op, Some(ints(vec![lo, hi]))));
    let unary = prop::sample::select(vec!["ISNULL", "NOT ISNULL"]).prop_map(|op| (op, None));

    (
        prop::sample::select(vec!["id", "age", "city", "name"]),
        prop_oneof![compare, list, between, unary],
        logic(),
    )
        .prop_map(|(column, (operator, operand), logic)| {
            let mut clause = match operand {
                Some(value) => ColumnClause::new(column, operator, value),
                None => ColumnClause::unary(column, operator),
            };
            clause.logic = logic;
            clause
        })
}

fn node() -> impl Strategy<Value = Node> {
    clause()
        .prop_map(Node::Clause)
        .prop_recursive(3, 24, 4, |inner| {
            (logic(), prop::collection::vec(inner, 1..4))
                .prop_map(|(logic, children)| Node::Group(logic, children))
        })
}

fn push(spec: FilterSpec, node: Node) -> FilterSpec {
    match node {
        Node::Clause(clause) => spec.entry(clause),
        Node::Group(logic, children) => children
            .into_iter()
            .fold(spec.entry(FilterEntry::Open(logic)), push)
            .close(),
    }
}

fn filter_spec() -> impl Strategy<Value = FilterSpec> {
    (prop::collection::vec(node(), 0..6), logic()).prop_map(|(nodes, operator)| {
        let mut spec = nodes.into_iter().fold(FilterSpec::new(), push);
        spec.operator = operator;
        spec
    })
}

fn compile(registry: &SchemaRegistry, spec: &FilterSpec) -> CompiledQuery {
    FilterCompiler::new(registry)
        .compile_select("user", spec)
        .unwrap()
}

proptest! {
    #[test]
    fn prop_placeholders_match_values(spec in filter_spec()) {
        let registry = registry();
        let query = compile(&registry, &spec);
        prop_assert_eq!(query.placeholder_count(), query.values.len());
    }

    #[test]
    fn prop_compilation_is_idempotent(spec in filter_spec()) {
        let registry = registry();
        let first = compile(&registry, &spec);
        let second = compile(&registry, &spec);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_brackets_balance(spec in filter_spec()) {
        let registry = registry();
        let query = compile(&registry, &spec);
        let open = query.sql.matches('(').count();
        let close = query.sql.matches(')').count();
        prop_assert_eq!(open, close, "unbalanced: {}", query.sql);
    }
}
