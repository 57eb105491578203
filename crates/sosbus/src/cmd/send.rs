use sosbus_client::Client;
use tracing::info;

use crate::cmd::{resolve_payload, SendArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: SendArgs, _format: OutputFormat) -> CliResult<i32> {
    let client = Client::new(args.server.client_config());
    let payload = resolve_payload(&args.payload)?;
    let message = client
        .message(&args.route.route(), payload)
        .map_err(|err| client_error("invalid message", err))?;

    client
        .connect()
        .map_err(|err| client_error("connect failed", err))?;
    client
        .post_message(&message)
        .map_err(|err| client_error("send failed", err))?;

    info!(
        server = %args.server.server,
        daddr = message.dest_addr(),
        msg_type = message.msg_type(),
        len = message.payload().len(),
        "message sent"
    );
    client.disconnect();
    Ok(SUCCESS)
}
