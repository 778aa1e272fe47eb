pub mod health;
pub use self::health::health;

pub mod user_register;
pub use self::user_register::{register, reset_confirm, reset_request};

pub mod user_login;
pub use self::user_login::{login, logout};

pub mod two_factor;
pub use self::two_factor::{
    challenge, challenge_poll, disable, enroll_poll, enroll_qrcode, enroll_start,
};
