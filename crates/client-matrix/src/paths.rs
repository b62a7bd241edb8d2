//! Endpoint paths. Every caller-supplied segment is percent-encoded.

const CLIENT_PREFIX: &str = "/_matrix/client/v3";
const MEDIA_PREFIX: &str = "/_matrix/media/v3";

pub(crate) fn client(segments: &[&str]) -> String {
    join(CLIENT_PREFIX, segments)
}

pub(crate) fn media(segments: &[&str]) -> String {
    join(MEDIA_PREFIX, segments)
}

pub(crate) fn sync() -> String {
    client(&["sync"])
}

fn join(prefix: &str, segments: &[&str]) -> String {
    let mut path = String::from(prefix);
    for segment in segments {
        path.push('/');
        path.push_str(&urlencoding::encode(segment));
    }
    path
}
