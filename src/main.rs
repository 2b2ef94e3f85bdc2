use getopts::Options;
use std::env;
use std::fs::File;
use std::io;
use std::process;

use coreforth::core::Forth;
use coreforth::loader::HasLoader;
use coreforth::memory::DEFAULT_CORE_SIZE;
use coreforth::output::Output;
use coreforth::source::Source;

fn main() {
    let args: Vec<_> = env::args().collect();
    let program = args[0].clone();
    let mut opts = Options::new();
    opts.optflag("d", "dump", "dump the core image to forth.core at exit");
    opts.optflag("h", "help", "print help menu");
    opts.optflag("v", "version", "print version number");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            process::exit(2);
        }
    };
    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return;
    }
    if matches.opt_present("v") {
        print_version();
        return;
    }

    let vm = &mut match Forth::new(DEFAULT_CORE_SIZE) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let mut status = 0;
    if !matches.free.is_empty() {
        for file in &matches.free {
            if let Err(e) = vm.load(file) {
                eprintln!("{}: {}", file, e);
                status = 1;
                break;
            }
        }
    } else if stdin_is_tty() {
        status = repl(vm);
    } else {
        vm.set_input(Source::from_reader(Box::new(io::stdin())));
        if vm.run().is_err() {
            status = 1;
        }
    }
    vm.flush();

    if matches.opt_present("d") {
        let dumped = File::create("forth.core")
            .map_err(|_| ())
            .and_then(|out| vm.dump_core(out).map_err(|_| ()));
        if dumped.is_err() {
            eprintln!("could not write forth.core");
            status = 1;
        }
    }
    process::exit(status);
}

fn repl(vm: &mut Forth) -> i32 {
    print_version();
    println!("Type Ctrl-D to exit.");
    let mut editor = rustyline::Editor::<()>::new();
    loop {
        match editor.readline("forth> ") {
            Ok(line) => {
                editor.add_history_entry(&line);
                if vm.eval(&line).is_err() {
                    vm.flush();
                    return 1;
                }
                vm.flush();
            }
            Err(rustyline::error::ReadlineError::Eof)
            | Err(rustyline::error::ReadlineError::Interrupted) => {
                return 0;
            }
            Err(err) => {
                eprintln!("{}", err);
                return 1;
            }
        }
    }
}

fn stdin_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

fn print_version() {
    println!("coreforth v{}", env!("CARGO_PKG_VERSION"));
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [-d] [file ...]", program);
    print!("{}", opts.usage(&brief));
}
