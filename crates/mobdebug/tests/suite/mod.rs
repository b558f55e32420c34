mod inspect;
mod session;
