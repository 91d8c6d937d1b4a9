//! Repository layer for database operations

pub mod books;
pub mod copies;
pub mod loans;
pub mod reservations;
pub mod system;
pub mod users;
pub mod wishlists;

use sqlx::{Pool, Postgres};

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub books: books::BooksRepository,
    pub copies: copies::CopiesRepository,
    pub loans: loans::LoansRepository,
    pub reservations: reservations::ReservationsRepository,
    pub users: users::UsersRepository,
    pub wishlists: wishlists::WishlistsRepository,
    pub system: system::SystemRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: books::BooksRepository::new(pool.clone()),
            copies: copies::CopiesRepository::new(pool.clone()),
            loans: loans::LoansRepository::new(pool.clone()),
            reservations: reservations::ReservationsRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            wishlists: wishlists::WishlistsRepository::new(pool.clone()),
            system: system::SystemRepository::new(pool.clone()),
            pool,
        }
    }
}
