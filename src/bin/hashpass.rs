// Seeding helper: print an Argon2id PHC hash for a ccms_user row.

use argon2::{Argon2, PasswordHasher};
use argon2::password_hash::{SaltString, rand_core::OsRng};

fn main() {
    let password = std::env::args()
        .nth(1)
        .expect("Usage: hashpass <password>  (outputs a ccms_user.password_hash value)");
    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string();
    println!("{phc}");
}
