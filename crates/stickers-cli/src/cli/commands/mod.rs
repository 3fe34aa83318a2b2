use super::args::*;

pub(crate) mod compile;
pub(crate) mod reverse;
pub(crate) mod validate;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Compile(args) => compile::run(args).await,
        Command::Validate(args) => validate::run(args).await,
        Command::Reverse(args) => reverse::run(args).await,
    }
}
