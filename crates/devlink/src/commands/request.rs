use std::io::{self, Write};

use devlink_api::{DeviceClient, Endpoint, RawResponse, RequestOptions};

use crate::cli::RequestArgs;
use crate::error::CliError;

pub fn handle(args: RequestArgs, client: &DeviceClient) -> Result<(), CliError> {
    let base = client.config().base_url().to_string();
    let endpoint = Endpoint::new(args.method, &args.path).map_err(|e| CliError::device(&base, e))?;

    let mut options = RequestOptions::new().params(args.query);
    for (name, value) in args.headers {
        options = options.header(name, value);
    }
    if let Some(json) = args.json {
        options = options.json(serde_json::from_str(&json)?);
    } else if let Some(data) = args.data {
        options = options.body(data, args.content_type);
    }

    tracing::debug!(%endpoint, isolated = args.isolated, "sending request");
    let result = if args.isolated {
        client.request_isolated(&endpoint, options)
    } else {
        client.request(&endpoint, options)
    };
    let response = result
        .into_result()
        .map_err(|e| CliError::device(&base, e))?;

    print_response(&response, args.include)?;
    if args.fail && response.status() >= 400 {
        return Err(CliError::HttpStatus {
            status: response.status(),
        });
    }
    Ok(())
}

/// Body to stdout; status line to stderr unless `include` puts it (and the
/// headers) on stdout ahead of the body.
fn print_response(response: &RawResponse, include: bool) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if include {
        writeln!(out, "HTTP {}", response.status())?;
        for (name, value) in response.headers() {
            writeln!(out, "{name}: {}", String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(out)?;
    } else {
        eprintln!("HTTP {}", response.status());
    }

    let body = response.body();
    out.write_all(body)?;
    if !body.is_empty() && !body.ends_with(b"\n") {
        writeln!(out)?;
    }
    out.flush()
}
