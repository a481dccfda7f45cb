//! The BUILD-language lexer, parser, tree-walking interpreter and builtins
//! (spec.md §4.1). Restructured from the teacher's bash `parser`/`ast`/
//! `interpreter` split onto the much smaller grammar in spec.md §6 — no
//! classes, exceptions, `while`, `import`, or user-defined varargs.

pub mod ast;
pub mod builtins;
pub mod callback;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod value;

use std::collections::HashMap;
use std::rc::Rc;

pub use error::LangError;
pub use error::Result;

use crate::fs::FileSystem;
use crate::graph::{BuildGraph, PackageId};

use builtins::BuiltinContext;
use callback::CallbackRegistry;
use parser::Parser;
use scope::Scope;

/// Parses and evaluates one BUILD file's source against `graph`, declaring
/// whatever targets/defaults its top-level statements produce.
///
/// `graph` and `callbacks` are passed in as `Rc<RefCell<..>>` handles (the
/// interpreter itself borrows neither by reference, since the builtin
/// closures it installs must be able to re-borrow them across calls).
pub fn evaluate_package(
    source: &str,
    fs: Rc<dyn FileSystem>,
    graph: Rc<std::cell::RefCell<BuildGraph>>,
    callbacks: Rc<std::cell::RefCell<CallbackRegistry>>,
    package_id: PackageId,
    package_dir: String,
    build_file_names: Vec<String>,
    preload_subincludes: &[String],
    preload_build_defs: &[String],
    buildconfig: &HashMap<String, String>,
) -> Result<()> {
    let module = Parser::parse_str(source)?;
    let globals = Scope::root();

    let ctx = Rc::new(BuiltinContext {
        graph: graph.clone(),
        fs,
        callbacks: callbacks.clone(),
        package_id,
        package_dir,
        build_file_names,
        globals: globals.clone(),
        visiting: Rc::new(std::cell::RefCell::new(Vec::new())),
    });

    builtins::install(&globals, ctx.clone(), buildconfig);
    builtins::preload(&ctx, preload_subincludes, preload_build_defs)?;

    let mut interp = interpreter::Interpreter::new(
        globals,
        interpreter::EvalContext {
            current_package_dir: ctx_package_dir(&graph, package_id),
            callbacks,
        },
    );
    interp.exec_module(&module)
}

fn ctx_package_dir(graph: &Rc<std::cell::RefCell<BuildGraph>>, id: PackageId) -> String {
    graph.borrow().package(id).dir.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::cell::RefCell;

    fn run(src: &str) -> (Rc<RefCell<BuildGraph>>, Result<()>) {
        let graph = Rc::new(RefCell::new(BuildGraph::new()));
        let pkg = graph.borrow_mut().get_or_create_package(None, "foo", "foo/BUILD");
        let fs: Rc<dyn FileSystem> = Rc::new(InMemoryFs::new());
        let callbacks = Rc::new(RefCell::new(CallbackRegistry::new()));
        let result = evaluate_package(
            src,
            fs,
            graph.clone(),
            callbacks,
            pkg,
            "foo".to_string(),
            vec!["BUILD".to_string()],
            &[],
            &[],
            &HashMap::new(),
        );
        (graph, result)
    }

    #[test]
    fn declares_a_genrule_target() {
        let (graph, result) = run(
            "genrule(\n    name = \"gen\",\n    srcs = [\"a.txt\"],\n    outs = [\"out.txt\"],\n    cmd = \"cp $SRCS $OUTS\",\n)\n",
        );
        result.unwrap();
        let graph = graph.borrow();
        let label = crate::label::Label::new("foo", "gen");
        assert!(graph.target_id(&label).is_some());
    }

    #[test]
    fn evaluates_control_flow_and_fstrings() {
        let (_, result) = run(
            "x = 1\nif x == 1:\n    y = f\"val-{x}\"\nelse:\n    y = \"no\"\nassert y == \"val-1\"\n",
        );
        result.unwrap();
    }

    #[test]
    fn name_error_reports_undefined_identifier() {
        let (_, result) = run("x = undefined_name\n");
        assert!(matches!(result, Err(LangError::NameError(_, _))));
    }

    #[test]
    fn duplicate_target_name_is_a_lang_error() {
        let (_, result) = run(
            "genrule(name = \"a\", srcs = [], outs = [\"o\"], cmd = \"true\")\ngenrule(name = \"a\", srcs = [], outs = [\"o\"], cmd = \"true\")\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn genrule_registers_pre_and_post_build_callbacks() {
        let (graph, result) = run(
            "def noop():\n    pass\ngenrule(\n    name = \"g\",\n    srcs = [],\n    outs = [\"o\"],\n    cmd = \"true\",\n    pre_build = noop,\n    post_build = noop,\n)\n",
        );
        result.unwrap();
        let graph = graph.borrow();
        let label = crate::label::Label::new("foo", "g");
        let id = graph.target_id(&label).unwrap();
        let t = graph.target(id);
        assert!(t.pre_build_callback.is_some());
        assert!(t.post_build_callback.is_some());
    }

    #[test]
    fn subinclude_splices_functions_into_caller_scope() {
        let graph = Rc::new(RefCell::new(BuildGraph::new()));
        let pkg = graph.borrow_mut().get_or_create_package(None, "foo", "foo/BUILD");
        let fs: Rc<dyn FileSystem> = Rc::new(InMemoryFs::with_files(&[(
            "build_defs/helpers.build_defs",
            "def double(n):\n    return n * 2\n",
        )]));
        let callbacks = Rc::new(RefCell::new(CallbackRegistry::new()));
        let result = evaluate_package(
            "subinclude(\"//build_defs:helpers\")\nassert double(2) == 4\n",
            fs,
            graph.clone(),
            callbacks,
            pkg,
            "foo".to_string(),
            vec!["BUILD".to_string()],
            &[],
            &[],
            &HashMap::new(),
        );
        result.unwrap();
    }

    #[test]
    fn subinclude_self_cycle_is_rejected() {
        let graph = Rc::new(RefCell::new(BuildGraph::new()));
        let pkg = graph.borrow_mut().get_or_create_package(None, "foo", "foo/BUILD");
        let fs: Rc<dyn FileSystem> = Rc::new(InMemoryFs::with_files(&[(
            "build_defs/a.build_defs",
            "subinclude(\"//build_defs:b\")\n",
        ), (
            "build_defs/b.build_defs",
            "subinclude(\"//build_defs:a\")\n",
        )]));
        let callbacks = Rc::new(RefCell::new(CallbackRegistry::new()));
        let result = evaluate_package(
            "subinclude(\"//build_defs:a\")\n",
            fs,
            graph,
            callbacks,
            pkg,
            "foo".to_string(),
            vec!["BUILD".to_string()],
            &[],
            &[],
            &HashMap::new(),
        );
        assert!(matches!(result, Err(LangError::SubincludeCycle(_))));
    }
}
