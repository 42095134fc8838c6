// ==========================================
// 种子包衣订单核心 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod error;
pub mod measurement_repo;
pub mod operator_repo;
pub mod order_repo;
pub mod product_repo;
pub mod recipe_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use measurement_repo::MeasurementRepository;
pub use operator_repo::OperatorRepository;
pub use order_repo::OrderRepository;
pub use product_repo::ProductRepository;
pub use recipe_repo::RecipeRepository;
