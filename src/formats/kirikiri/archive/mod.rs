pub mod crypt;
pub mod xp3;
pub mod xp3pack;
