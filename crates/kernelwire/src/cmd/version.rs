use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("kernelwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: kernelwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("protocol_version: {}", kernelwire_frame::PROTOCOL_VERSION);
    println!(
        "target: {}",
        option_env!("KERNELWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    let (major, minor, patch) = kernelwire_transport::zmq_version();
    println!("libzmq: {major}.{minor}.{patch}");
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));

    Ok(SUCCESS)
}
