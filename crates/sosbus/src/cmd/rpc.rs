use sosbus_client::Client;

use crate::cmd::{parse_duration, resolve_payload, RpcArgs};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_message, OutputFormat};

pub fn run(args: RpcArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let client = Client::new(args.server.client_config());
    let payload = resolve_payload(&args.payload)?;
    let request = client
        .message(&args.route.route(), payload)
        .map_err(|err| client_error("invalid message", err))?;

    client
        .connect()
        .map_err(|err| client_error("connect failed", err))?;
    let replies = client
        .post_rpc_message(&request, &args.reply.pattern(), Some(timeout), args.nreplies)
        .map_err(|err| client_error("rpc failed", err))?;

    for reply in &replies {
        print_message(reply, format);
    }

    if replies.is_empty() && args.nreplies > 0 {
        return Err(CliError::new(
            TIMEOUT,
            format!("no reply within {}", args.timeout.trim()),
        ));
    }
    Ok(SUCCESS)
}
