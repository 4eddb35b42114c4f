use proptest::prelude::*;
use xmd::module::{DependencyDetector, DependencyGraph};
use xmd::pattern::{MatchMode, Pattern};
use xmd::script::builtins::call_builtin;
use xmd::script::stmt::{parse_document, parse_script};
use xmd::script::value::Value;
use xmd::ModuleError;

fn names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("m{i}")).collect()
}

/// `deps` pairs are `(module, dependency)` indices.
fn graph(n: usize, deps: &[(usize, usize)]) -> DependencyGraph {
    let names = names(n);
    let mut g = DependencyGraph::new();
    // Reverse registration so insertion order never happens to be a valid
    // load order on its own.
    for name in names.iter().rev() {
        g.add_module(name).unwrap();
    }
    for &(m, d) in deps {
        g.add_dependency(&names[m], &names[d]).unwrap();
    }
    g
}

/// Random DAG: module `j` may only depend on modules with a lower index.
fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..10).prop_flat_map(|n| {
        let edges = prop::collection::vec((0..n, 0..n), 0..n * 2).prop_map(|pairs| {
            pairs
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.max(b), a.min(b)))
                .collect::<Vec<_>>()
        });
        (Just(n), edges)
    })
}

/// Random directed graph, self-loops included.
fn any_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..8).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..n * 2)))
}

proptest! {
    /// Every module appears once and every dependency precedes its dependent.
    #[test]
    fn topological_order_respects_edges((n, deps) in dag()) {
        let mut g = graph(n, &deps);
        let order = g.topological_sort().unwrap().to_vec();
        prop_assert_eq!(order.len(), n);
        let position = |name: &str| order.iter().position(|o| o == name).unwrap();
        let names = names(n);
        for name in &names {
            prop_assert_eq!(order.iter().filter(|o| *o == name).count(), 1);
        }
        for &(m, d) in &deps {
            prop_assert!(position(&names[d]) < position(&names[m]));
        }
    }

    /// The DFS detector and Kahn's algorithm agree on every graph, and a
    /// reported cycle is a closed walk along real edges.
    #[test]
    fn detector_agrees_with_sort((n, deps) in any_graph()) {
        let mut sorted = graph(n, &deps);
        let sort_failed = sorted.topological_sort().is_err();

        let mut detector = DependencyDetector::new(graph(n, &deps));
        match detector.check_circular() {
            Ok(()) => prop_assert!(!sort_failed),
            Err(ModuleError::CircularDependency { path }) => {
                prop_assert!(sort_failed);
                prop_assert!(path.len() >= 2);
                prop_assert_eq!(path.first(), path.last());
                let names = names(n);
                let index = |s: &str| names.iter().position(|x| x == s).unwrap();
                for pair in path.windows(2) {
                    // An edge `a -> b` means `b` depends on `a`.
                    let (a, b) = (index(&pair[0]), index(&pair[1]));
                    prop_assert!(deps.contains(&(b, a)));
                }
            }
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }
}

fn fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("<!-- xmd: ".to_owned()),
        Just("<!-- xmd:\n".to_owned()),
        Just(" -->".to_owned()),
        Just("```xmd\n".to_owned()),
        Just("```\n".to_owned()),
        Just("\n".to_owned()),
        Just("  ".to_owned()),
        Just("set x = 1".to_owned()),
        Just("{{ x }}".to_owned()),
        Just("${x}".to_owned()),
        Just("for i in 1..3".to_owned()),
        Just("endfor".to_owned()),
        Just("if x then".to_owned()),
        Just("elif".to_owned()),
        Just("else".to_owned()),
        Just("endif".to_owned()),
        Just("class A extends B".to_owned()),
        Just("method m".to_owned()),
        Just("function f a b".to_owned()),
        Just("import * from m".to_owned()),
        Just("import a as b from".to_owned()),
        Just("export".to_owned()),
        Just("loop -2 times".to_owned()),
        Just("File.write".to_owned()),
        "[a-z0-9 .,=+*\"'(){}\\[\\]<>!-]{0,8}",
        "\\PC{0,4}",
    ]
}

proptest! {
    /// Malformed input is recovered from, never a panic.
    #[test]
    fn parser_does_not_panic(parts in prop::collection::vec(fragment(), 0..24)) {
        let src = parts.concat();
        let _ = parse_document(&src, None);
        let _ = parse_script(&src, Some("fuzz.xmd"));
    }

    #[test]
    fn parser_does_not_panic_on_text(s in "\\PC{0,64}") {
        let _ = parse_document(&s, None);
    }
}

proptest! {
    /// Catch-all patterns match everything; a literal matches itself.
    #[test]
    fn catch_all_patterns_match(s in "\\PC*") {
        prop_assert!(Pattern::new("", MatchMode::Regexp).unwrap().matches(&s));
        prop_assert!(Pattern::new("**", MatchMode::Glob).unwrap().matches(&s));
        prop_assert!(Pattern::new(&s, MatchMode::Exact).unwrap().matches(&s));
    }
}

proptest! {
    /// substr built-in: result is a subsequence of the input and not longer.
    #[test]
    fn substr_properties(s in "\\PC*", start in 0i64..100i64, len in 0i64..100i64) {
        let args = [Value::from(s.as_str()), Value::from(start), Value::from(len)];
        if let Some(Ok(Value::Str(out))) = call_builtin("substr", &args) {
            prop_assert!(out.chars().count() <= s.chars().count());
            let mut it = s.chars();
            for c in out.chars() {
                prop_assert!(it.any(|x| x == c));
            }
        }
    }
}
