use devlink_api::{DeviceClient, Endpoint, RequestOptions};

use crate::cli::ProbeArgs;
use crate::error::CliError;

pub fn handle(args: &ProbeArgs, client: &DeviceClient) -> Result<(), CliError> {
    let base = client.config().base_url().to_string();
    let endpoint = Endpoint::get(&args.path).map_err(|e| CliError::device(&base, e))?;

    let response = client
        .request(&endpoint, RequestOptions::new())
        .into_result()
        .map_err(|e| CliError::device(&base, e))?;

    println!("target:  {}", client.target());
    println!("url:     {}", response.url());
    println!("status:  {}", response.status());
    println!("auth:    {}", client.auth_scheme());
    if let Some(server) = response.header("server") {
        println!("server:  {server}");
    }
    Ok(())
}
