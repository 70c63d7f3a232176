pub mod domain_profile;
pub mod messages;
pub mod scrape_target;
