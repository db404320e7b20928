pub mod attempt_dto;
pub mod response;
