//! ABI of the startup funding contract.
//!
//! Declared once with `sol!` so that every read decodes into typed tuples and
//! every write is encoded from a typed call struct. Amount fields are wei
//! (18 decimals); timestamps are as stored by the contract.

use alloy_sol_types::sol;

sol! {
    #![sol(all_derives)]

    struct EquityHolder {
        string name;
        uint256 percentage;
    }

    struct Funder {
        address funderAddress;
        uint256 amount;
        uint256 tokenId;
    }

    struct DocumentHash {
        string ipfsHash;
        string documentType;
        uint256 timestamp;
    }

    struct Milestone {
        string title;
        string description;
        uint256 fundAmount;
        bool isCompleted;
        string ipfsHash;
        uint256 completionTimestamp;
    }

    struct Startup {
        address owner;
        string title;
        string description;
        EquityHolder[] equityHolders;
        string pitchVideo;
        string image;
        uint256 target;
        uint256 deadline;
        uint256 amountCollected;
        uint256 amountReleased;
        Funder[] funders;
        DocumentHash[] documentHashes;
        Milestone[] milestones;
        bool isVerified;
    }

    struct LoanRequest {
        address requester;
        string name;
        string purpose;
        uint256 amount;
        uint256 duration;
        uint256 amountCollected;
        Funder[] lenders;
        DocumentHash[] documentHashes;
        bool repaid;
    }

    interface IStartupFunding {
        // reads
        function getStartups() external view returns (Startup[] memory);
        function getLoanRequests() external view returns (LoanRequest[] memory);
        function getStartupDocuments(uint256 _id) external view returns (DocumentHash[] memory);
        function getLoanDocuments(uint256 _id) external view returns (DocumentHash[] memory);
        function getStartupMilestones(uint256 _id) external view returns (Milestone[] memory);
        function getInvestorTokens(address _investor, uint256 _startupId) external view returns (uint256[] memory);
        function tokenURI(uint256 tokenId) external view returns (string memory);
        function getInvestmentAmount(address _investor, uint256 _startupId) external view returns (uint256);
        function hasInvestmentIn(address _investor, uint256 _startupId) external view returns (bool);
        function verifier() external view returns (address);

        // writes
        function createStartup(
            address _owner,
            string _title,
            string _description,
            EquityHolder[] _equityHolders,
            string _pitchVideo,
            string _image,
            uint256 _target,
            uint256 _deadline
        ) external returns (uint256);
        function requestLoan(
            address _requester,
            string _name,
            string _purpose,
            uint256 _amount,
            uint256 _duration
        ) external returns (uint256);
        function fundStartup(uint256 _id) external payable;
        function fundLoan(uint256 _id) external payable;
        function withdrawFunds(uint256 _id) external;
        function withdrawLoanFunds(uint256 _id) external;
        function repayLoan(uint256 _id) external payable;
        function verifyStartup(uint256 _id) external;
        function addStartupDocument(uint256 _id, string _ipfsHash, string _documentType) external;
        function addLoanDocument(uint256 _id, string _ipfsHash, string _documentType) external;
        function addStartupMilestone(uint256 _id, string _title, string _description, uint256 _fundAmount) external;
        function completeMilestone(uint256 _startupId, uint256 _milestoneId, string _proofIpfsHash) external;
        function refundInvestment(uint256 _startupId) external;
    }
}
