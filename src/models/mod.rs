mod api;

pub use api::{
    ApiResponse, ContactReceipt, ContactRequest, CreateUserRequest, Deleted, ErrorBody,
    ErrorEnvelope, HealthResponse, Item, ItemPath, ListUsersQuery, MemoryUsage, Pagination,
    RouteNotFound, UpdateUserRequest, User, UserList, UserPath, ValidationErrors,
};
