//! ABI bindings for the sale, stablecoin and sale-token contracts.

use alloy::sol;

sol! {
    /// Presale contract surface consumed by this client.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IPresale {
        error InsufficientUSDT();
        error InsufficientETH();
        error TokenSoldOut();
        error PresaleNotActive();
        error ZeroAmount();
        error TransferFailed();

        function getTokenInfo() external view returns (
            string name,
            string symbol,
            uint256 availableTokens,
            uint256 reserved3,
            uint256 reserved4,
            uint256 pricePerTokenUsdt,
            uint256 reserved6,
            uint256 reserved7,
            bool presaleActive,
            bool usdtPaymentEnabled
        );

        function totalSoldTokens() external view returns (uint256);

        function buyTokenWithUSDT(uint256 tokenAmount) external;
    }
}

sol! {
    /// Minimal ERC-20 surface for the payment stablecoin and the sale token.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);
    }
}
