use crate::routes::Reply;

pub const WELCOME: &str = "Welcome To SickleClinix !";

/// `GET /`
pub fn handle() -> Reply {
    Reply::text(200, WELCOME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welcome_text() {
        let reply = handle();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, b"Welcome To SickleClinix !");
    }
}
