use url::form_urlencoded;

pub const COMMAND_ARG: &str = "command";
pub const MAX_REQUEST_BODY: usize = 1024;

/// Request arguments from the query string followed by an urlencoded body.
pub fn arguments(query: Option<&str>, body: &[u8]) -> Vec<(String, String)> {
    let mut args: Vec<(String, String)> = query
        .map(|query| form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    args.extend(form_urlencoded::parse(body).into_owned());
    args
}

pub fn argument(query: Option<&str>, body: &[u8], name: &str) -> Option<String> {
    arguments(query, body)
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}

pub fn not_found_message(path: &str, method: &str, args: &[(String, String)]) -> String {
    let mut message = format!(
        "File Not Found\n\nURI: {path}\nMethod: {method}\nArguments: {}\n",
        args.len()
    );
    for (name, value) in args {
        message.push_str(&format!(" {name}: {value}\n"));
    }
    message
}
