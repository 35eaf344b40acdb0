//! Connection URL construction

use url::Url;

use roomlink_types::{ParticipantName, RoomId};

use crate::error::ClientError;
use crate::router::ResumePoint;

/// Query keys owned by the client; any existing values are replaced
const OWNED_KEYS: [&str; 4] = ["room", "name", "since", "epoch"];

/// Parse the server base URL. `http`/`https` are mapped to `ws`/`wss`.
pub fn parse_base(base: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(ClientError::UnsupportedScheme(url.scheme().to_string()));
    }
    Ok(url)
}

/// Build the URL for one connection attempt.
///
/// The result always carries `room=` and `name=`; `since=` and `epoch=` are
/// added when the client has been in the room before.
pub fn connection_url(
    base: &Url,
    room: &RoomId,
    name: &ParticipantName,
    resume: Option<ResumePoint>,
) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| !OWNED_KEYS.contains(&&**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.extend_pairs(kept);
        query.append_pair("room", room.as_str());
        query.append_pair("name", name.as_str());
        if let Some(resume) = resume {
            query.append_pair("since", &resume.seq.to_string());
            query.append_pair("epoch", &resume.epoch.to_string());
        }
    }
    url
}
