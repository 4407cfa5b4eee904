use std::process;

fn main() {
    match toxn::cli::run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(-1);
        }
    }
}
