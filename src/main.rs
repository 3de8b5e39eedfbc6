use color_eyre::Result;

use tapcard::{cli, commands, errors, logging};

#[tokio::main]
async fn main() -> Result<()> {
    errors::install_hooks()?;

    let args = cli::Args::parse_args();

    if let Some(ref data_dir) = args.data_dir {
        // SAFETY: This is called at program startup before any other threads exist
        unsafe {
            std::env::set_var("TAPCARD_DATA", data_dir);
        }
    }

    logging::init()?;

    commands::execute(&args).await?;

    Ok(())
}
