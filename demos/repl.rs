use mintlisp::Interpreter;
use mintlisp::ast::Kind;
use mintlisp::evaluator::Environment;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("MintLisp interpreter");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut interp = Interpreter::new();

    loop {
        match rl.readline("mintlisp> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line.split_once(' ').unwrap_or((line, "")) {
                    (":help", _) => {
                        print_help();
                        continue;
                    }
                    (":env", _) => {
                        print_environment(interp.global());
                        continue;
                    }
                    (":load", path) => {
                        load_file(&mut interp, path.trim());
                        continue;
                    }
                    (":run", _) => {
                        for value in interp.run() {
                            print_value(&value);
                        }
                        continue;
                    }
                    (":tree", _) => {
                        print_trees(&interp);
                        continue;
                    }
                    (":rm", id) => {
                        match id.trim().parse() {
                            Ok(id) => match interp.remove_by_id(id) {
                                Some(removed) => println!("removed {removed}"),
                                None => println!("Error: no removable node {id}"),
                            },
                            Err(_) => println!("Error: usage :rm <id>"),
                        }
                        continue;
                    }
                    (":quit" | ":exit", _) => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match interp.eval_str(line) {
                    Ok(value) => print_value(&value),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

// `define`, `set!` and `print` give null, which is not worth echoing
fn print_value(value: &mintlisp::ast::Expr) {
    if !value.is_null() {
        println!("{value}");
    }
}

fn load_file(interp: &mut Interpreter, path: &str) {
    match std::fs::read_to_string(path) {
        Ok(source) => match interp.load(&source) {
            Ok(roots) => println!("Loaded {} tree(s) from {path}", roots.len()),
            Err(e) => println!("Error: {e}"),
        },
        Err(e) => println!("Error: cannot read {path}: {e}"),
    }
}

fn print_trees(interp: &Interpreter) {
    if interp.forest().is_empty() {
        println!("No trees loaded. Use :load <file>.");
        return;
    }
    for tree in interp.trees() {
        println!("#{} {}", tree.id(), tree);
        for (i, element) in tree.flatten().iter().enumerate() {
            println!("  [{i}] #{} {element}", element.id());
        }
    }
    println!();
    println!("{}", interp.export());
}

fn print_help() {
    println!("MintLisp REPL commands:");
    println!("  :help        - Show this help message");
    println!("  :env         - Show current environment bindings");
    println!("  :load <file> - Read a file into the tree forest without evaluating it");
    println!("  :run         - Evaluate every loaded tree in order");
    println!("  :tree        - Show loaded trees with node ids");
    println!("  :rm <id>     - Remove a node from the loaded trees");
    println!("  :quit        - Exit the interpreter");
    println!("  :exit        - Exit the interpreter");
    println!("  Ctrl+C       - Exit the interpreter");
    println!();
    println!("Supported operations:");
    println!("  Numbers: 42, -5, 1.5");
    println!("  Arithmetic: +, -, *, /, mod, pow, abs, sqrt, ...");
    println!("  Comparison: =, <, >, <=, >=");
    println!("  Logic: and, or, not");
    println!("  Lists: cons, list, car, cdr, cadr, ..., null?");
    println!("  Special forms: define, set!, if, lambda, begin, quote");
    println!();
    println!("Examples:");
    println!("  (define (fact n acc) (if (= n 0) acc (fact (- n 1) (* acc n))))");
    println!("  (fact 10 1)");
    println!("  ((lambda (a b) (* a b)) 4 1.5)");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate primitives from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value.kind() {
            Kind::Primitive(_) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Primitives ({}):", builtins.len());
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
