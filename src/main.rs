fn main() {
    env_logger::init();

    if let Err(err) = handle_cli_flags() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Springram {}", springram::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                println!(
                    "Springram — Client-side sync layer for the Springram feed.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n  --status             Check backend readiness and exit"
                );
                return Ok(());
            }
            "--status" => return check_status_once(),
            _ => {}
        }
    }
    println!("Springram {} (library crate; see --help)", springram::VERSION);
    Ok(())
}

fn check_status_once() -> anyhow::Result<()> {
    let config = springram::config::load(springram::config::LoadOptions::default())?;
    let readiness = springram::app::check_readiness(&config.api.base_url, config.api.timeout)?;
    if readiness.is_up() {
        println!("Backend at {} is ready.", config.api.base_url);
        Ok(())
    } else {
        anyhow::bail!(
            "backend at {} reported status {}",
            config.api.base_url,
            readiness.status
        )
    }
}
